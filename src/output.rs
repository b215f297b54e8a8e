//! Writing DICOM objects back to disk.
//!
//! Two operations produce files: plan summation turns its combined
//! grid back into an RT Dose object, and the anonymizer saves the
//! rewritten copies of a patient's objects. Summed doses are encoded
//! as explicit VR little endian with 32-bit stored pixels; every file
//! goes out with the standard 128-byte preamble.

use std::path::{Path, PathBuf};

use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::object::{FileMetaTableBuilder, WithMetaError, WriteError};
use dicom::transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN;
use dicom_dictionary_std::tags;
use thiserror::Error;
use tracing::info;

use crate::adapter::RtObject;
use crate::dose::DoseGrid;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to assemble file meta group")]
    Meta(#[from] WithMetaError),

    #[error("failed to write DICOM file")]
    Write(#[from] WriteError),

    #[error("failed to create output directory")]
    CreateDir(#[from] std::io::Error),
}

/// Writes a dose grid as an RT Dose file at `path`.
///
/// `template` supplies every tag the grid does not own; SOP class and
/// instance UIDs carry over unchanged. The grid overwrites pixel data,
/// scaling, frame offsets, lattice shape, spacing and position, and
/// the pixel description tags become 32-bit unsigned.
pub fn write_dose(
    template: &RtObject,
    grid: &DoseGrid,
    path: impl AsRef<Path>,
) -> Result<(), OutputError> {
    let mut ds = (*template.ds).clone();
    let (frames, rows, columns) = grid.frames.dim();

    let bytes: Vec<u8> = grid.frames.iter().flat_map(|v| v.to_le_bytes()).collect();
    ds.put(DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(bytes)));
    ds.put(DataElement::new(
        tags::GRID_FRAME_OFFSET_VECTOR,
        VR::DS,
        PrimitiveValue::F64(grid.offsets().to_vec().into()),
    ));
    ds.put(DataElement::new(
        tags::DOSE_GRID_SCALING,
        VR::DS,
        PrimitiveValue::from(grid.scaling),
    ));
    ds.put(DataElement::new(
        tags::NUMBER_OF_FRAMES,
        VR::IS,
        PrimitiveValue::from(frames as i32),
    ));
    ds.put(DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(rows as u16)));
    ds.put(DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(columns as u16)));
    ds.put(DataElement::new(
        tags::PIXEL_SPACING,
        VR::DS,
        // Row spacing first, per the DICOM attribute definition.
        PrimitiveValue::F64(vec![grid.pixel_spacing.1, grid.pixel_spacing.0].into()),
    ));
    ds.put(DataElement::new(
        tags::IMAGE_POSITION_PATIENT,
        VR::DS,
        PrimitiveValue::F64(grid.origin.to_vec().into()),
    ));
    ds.put(DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(32_u16)));
    ds.put(DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(32_u16)));
    ds.put(DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(31_u16)));
    ds.put(DataElement::new(
        tags::PIXEL_REPRESENTATION,
        VR::US,
        PrimitiveValue::from(0_u16),
    ));

    let file = ds.with_meta(
        FileMetaTableBuilder::new().transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN.uid()),
    )?;
    file.write_to_file(path.as_ref())?;
    info!(path = %path.as_ref().display(), frames, "wrote RT Dose");
    Ok(())
}

/// Saves each object as `<SOPInstanceUID>.dcm` under `dir`, creating
/// the directory if needed. Returns the written paths.
pub fn save_objects(objects: &[RtObject], dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, OutputError> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(objects.len());
    for object in objects {
        let path = dir.join(format!("{}.dcm", object.sop_instance_uid()));
        object.ds.write_to_file(&path)?;
        written.push(path);
    }
    info!(dir = %dir.display(), files = written.len(), "saved DICOM objects");
    Ok(written)
}
