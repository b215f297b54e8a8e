//! In-place anonymization of a patient's DICOM-RT objects.
//!
//! Rewrites identifying tags that are already present and never adds
//! ones that are not: dates become 1901-01-01, times become midnight,
//! names and institutions become placeholder strings. Private groups
//! are optionally stripped.

use dicom::core::header::Header;
use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;
use tracing::debug;

use crate::adapter::{RtObject, SopClass};
use crate::worker::{CancelToken, Cancelled, ProgressSink, check_cancelled, post};

pub const PLACEHOLDER: &str = "anonymized";
pub const INTERPRETER_PLACEHOLDER: &str = "anonymous";
const ANON_DATE: &str = "19010101";
const ANON_TIME: &str = "000000";

/// Free-text tags naming people, institutions or devices.
const IDENTITY_TAGS: &[Tag] = &[
    tags::INSTITUTION_NAME,
    tags::INSTITUTION_ADDRESS,
    tags::INSTITUTIONAL_DEPARTMENT_NAME,
    tags::REFERRING_PHYSICIAN_NAME,
    tags::PERFORMING_PHYSICIAN_NAME,
    tags::PHYSICIANS_OF_RECORD,
    tags::OPERATORS_NAME,
    tags::REVIEWER_NAME,
    tags::MANUFACTURER,
    tags::MANUFACTURER_MODEL_NAME,
    tags::STATION_NAME,
];

/// Anonymizes every object of one patient in place.
///
/// `name` and `id` replace PatientName and PatientID. Progress is
/// posted per object.
pub fn anonymize(
    objects: &mut [RtObject],
    name: &str,
    id: &str,
    remove_private_tags: bool,
    progress: Option<ProgressSink<'_>>,
    cancel: &CancelToken,
) -> Result<(), Cancelled> {
    let total = objects.len();
    for (done, object) in objects.iter_mut().enumerate() {
        check_cancelled(cancel, progress, done, total)?;

        let kind = object.sop_class();
        rewrite_common(&mut object.ds, name, id);
        match kind {
            SopClass::RtStruct => rewrite_structure_set(&mut object.ds),
            SopClass::RtPlan => rewrite_plan(&mut object.ds),
            _ => {}
        }
        if remove_private_tags {
            strip_private_groups(&mut object.ds);
        }

        let label = match kind {
            SopClass::RtDose => "rtdose",
            SopClass::RtStruct => "rtss",
            SopClass::RtPlan => "rtplan",
            SopClass::Image => "image",
            SopClass::Other => "other",
        };
        post(progress, done + 1, total, label);
    }
    debug!(objects = total, "anonymization complete");
    Ok(())
}

fn rewrite_common(ds: &mut InMemDicomObject, name: &str, id: &str) {
    // Every date and time in the object, whatever its tag.
    let dated: Vec<(Tag, VR)> = ds
        .iter()
        .filter(|el| matches!(el.vr(), VR::DA | VR::TM))
        .map(|el| (el.tag(), el.vr()))
        .collect();
    for (tag, vr) in dated {
        let value = if vr == VR::DA { ANON_DATE } else { ANON_TIME };
        ds.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
    }

    rewrite(ds, tags::PATIENT_NAME, name);
    rewrite(ds, tags::PATIENT_ID, id);
    for &tag in IDENTITY_TAGS {
        rewrite(ds, tag, PLACEHOLDER);
    }
    rewrite(ds, tags::ACCESSION_NUMBER, "");
    rewrite(ds, tags::PATIENT_BIRTH_DATE, "");
    rewrite(ds, tags::PATIENT_SEX, "O");
    rewrite(ds, tags::STUDY_ID, "1");
    rewrite(ds, tags::DEVICE_SERIAL_NUMBER, "0");
    rewrite(ds, tags::SOFTWARE_VERSIONS, "1.0");
}

fn rewrite_structure_set(ds: &mut InMemDicomObject) {
    rewrite(ds, tags::SERIES_DESCRIPTION, PLACEHOLDER);
    rewrite_items(ds, tags::RTROI_OBSERVATIONS_SEQUENCE, |item| {
        rewrite(item, tags::ROI_INTERPRETER, INTERPRETER_PLACEHOLDER);
    });
}

fn rewrite_plan(ds: &mut InMemDicomObject) {
    rewrite(ds, tags::RT_PLAN_NAME, PLACEHOLDER);
    rewrite_items(ds, tags::BEAM_SEQUENCE, |item| {
        rewrite(item, tags::TREATMENT_MACHINE_NAME, PLACEHOLDER);
    });
    rewrite_items(ds, tags::SOURCE_SEQUENCE, |item| {
        rewrite(item, tags::SOURCE_MANUFACTURER, PLACEHOLDER);
    });
}

/// Overwrites `tag` with `value`, keeping its VR. Absent tags stay
/// absent.
fn rewrite(ds: &mut InMemDicomObject, tag: Tag, value: &str) {
    if let Ok(Some(el)) = ds.element_opt(tag) {
        let vr = el.vr();
        ds.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
    }
}

fn rewrite_items(ds: &mut InMemDicomObject, seq_tag: Tag, f: impl Fn(&mut InMemDicomObject)) {
    let Ok(Some(el)) = ds.element_opt(seq_tag) else {
        return;
    };
    let Some(items) = el.items() else {
        return;
    };
    let mut items = items.to_vec();
    for item in &mut items {
        f(item);
    }
    ds.put(DataElement::new(seq_tag, VR::SQ, DataSetSequence::from(items)));
}

fn strip_private_groups(ds: &mut InMemDicomObject) {
    let private: Vec<Tag> = ds
        .iter()
        .map(|el| el.tag())
        .filter(|tag| tag.group() % 2 == 1)
        .collect();
    for tag in private {
        ds.remove_element(tag);
    }
}
