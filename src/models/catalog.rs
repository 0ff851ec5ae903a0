//! Fixed catalog of deposition content types, content formats, milestones and
//! repository types. A content type names the permitted formats plus the short
//! code used in file names; a content format names the on-disk extension.

/// Optional stage tags appended to the file name base
pub const MILESTONES: &[&str] = &[
    "upload",
    "upload-convert",
    "deposit",
    "annotate",
    "release",
    "review",
];

/// Top-level repository subdivisions
pub const REPOSITORY_TYPES: &[&str] = &[
    "deposit",
    "archive",
    "workflow",
    "session",
    "onedep-deposit",
    "onedep-archive",
    "onedep-workflow",
    "onedep-session",
    "test",
    "tests",
    "unit-test",
    "unit-tests",
];

/// (content type, permitted formats, file name code)
const CONTENT_TYPES: &[(&str, &[&str], &str)] = &[
    ("model", &["pdbx", "pdb", "pdbml", "cifeps"], "model"),
    ("model-emd", &["pdbx", "xml"], "model-emd"),
    ("model-aux", &["pdbx"], "model-aux"),
    ("structure-factors", &["pdbx", "mtz", "txt"], "sf"),
    ("nmr-data-config", &["json"], "nmr-data-config"),
    ("nmr-data-nef", &["nmr-star", "pdbx"], "nmr-data-nef"),
    ("nmr-data-str", &["nmr-star", "pdbx"], "nmr-data-str"),
    (
        "nmr-restraints",
        &[
            "any", "nmr-star", "amber", "amber-aux", "cns", "cyana", "xplor", "xplor-nih",
            "pdb-mr", "mr",
        ],
        "mr",
    ),
    ("nmr-chemical-shifts", &["nmr-star", "pdbx", "any"], "cs"),
    ("nmr-chemical-shifts-raw", &["nmr-star", "pdbx"], "cs-raw"),
    ("nmr-chemical-shifts-auth", &["nmr-star", "pdbx"], "cs-auth"),
    ("nmr-peaks", &["any"], "nmr-peaks"),
    ("nmr-harvest-file", &["tgz"], "nmr-harvest-file"),
    ("nmr-cs-path-list", &["txt"], "nmr-cs-path-list"),
    (
        "component-image",
        &["jpg", "png", "gif", "svg", "tif", "tiff"],
        "ccimg",
    ),
    ("component-definition", &["pdbx", "sdf"], "ccdef"),
    ("em-volume", &["map", "ccp4", "mrc2000", "bcif"], "em-volume"),
    (
        "em-mask-volume",
        &["map", "ccp4", "mrc2000", "bcif"],
        "em-mask-volume",
    ),
    (
        "em-half-volume",
        &["map", "ccp4", "mrc2000", "bcif"],
        "em-half-volume",
    ),
    (
        "em-additional-volume",
        &["map", "ccp4", "mrc2000", "bcif"],
        "em-additional-volume",
    ),
    ("em-volume-report", &["json"], "em-volume-report"),
    ("em-volume-header", &["xml"], "em-volume-header"),
    ("em-model-emd", &["pdbx"], "em-model-emd"),
    ("em-structure-factors", &["pdbx", "mtz"], "em-sf"),
    ("validation-report", &["pdf"], "val-report"),
    ("validation-report-full", &["pdf"], "val-report-full"),
    (
        "validation-report-slider",
        &["png", "svg"],
        "val-report-slider",
    ),
    ("validation-data", &["pdbx", "xml"], "val-data"),
    ("validation-report-images", &["tar"], "val-report-images"),
    ("validation-report-depositor", &["pdf"], "valdep"),
    ("seq-assign", &["pdbx"], "seq-assign"),
    ("sequence-fasta", &["fasta", "fsa"], "fasta"),
    ("blast-match", &["xml"], "blast-match"),
    ("messages-from-depositor", &["pdbx"], "messages-from-depositor"),
    ("messages-to-depositor", &["pdbx"], "messages-to-depositor"),
    ("notes-from-annotator", &["pdbx"], "notes-from-annotator"),
    (
        "correspondence-to-depositor",
        &["txt"],
        "correspondence-to-depositor",
    ),
    ("map-2fofc", &["map"], "map-2fofc"),
    ("map-fofc", &["map"], "map-fofc"),
    ("fsc", &["xml"], "fsc-xml"),
    ("fsc-report", &["txt"], "fsc-report"),
    ("img-emdb", &["jpg", "png", "gif", "svg", "tif"], "img-emdb"),
    ("layer-lines", &["txt"], "layer-lines"),
    ("auxiliary-file", &["any"], "aux-file"),
    ("parameter-file", &["any"], "parm"),
    ("structure-def-file", &["any"], "struct"),
    ("topology-file", &["any"], "topo"),
];

/// (content format, on-disk extension)
const FORMAT_EXTENSIONS: &[(&str, &str)] = &[
    ("pdbx", "cif"),
    ("pdb", "pdb"),
    ("cifeps", "cifeps"),
    ("pdbml", "xml"),
    ("nmr-star", "str"),
    ("gz", "gz"),
    ("tgz", "tgz"),
    ("mtz", "mtz"),
    ("html", "html"),
    ("jpg", "jpg"),
    ("png", "png"),
    ("svg", "svg"),
    ("gif", "gif"),
    ("tif", "tif"),
    ("tiff", "tiff"),
    ("sdf", "sdf"),
    ("ccp4", "ccp4"),
    ("mrc2000", "mrc"),
    ("pic", "pic"),
    ("txt", "txt"),
    ("xml", "xml"),
    ("pdf", "pdf"),
    ("map", "map"),
    ("bcif", "bcif"),
    ("amber", "amber"),
    ("amber-aux", "amber-aux"),
    ("cns", "cns"),
    ("cyana", "cyana"),
    ("xplor", "xplor"),
    ("xplor-nih", "xplor-nih"),
    ("pdb-mr", "mr"),
    ("mr", "mr"),
    ("json", "json"),
    ("fsa", "fsa"),
    ("fasta", "fasta"),
    ("any", "dat"),
    ("mdl", "mdl"),
    ("tar", "tar"),
];

pub fn is_known_content_type(content_type: &str) -> bool {
    CONTENT_TYPES.iter().any(|(ct, _, _)| *ct == content_type)
}

/// Short code embedded in file names for a content type
pub fn content_type_code(content_type: &str) -> Option<&'static str> {
    CONTENT_TYPES
        .iter()
        .find(|(ct, _, _)| *ct == content_type)
        .map(|(_, _, code)| *code)
}

pub fn allowed_formats(content_type: &str) -> Option<&'static [&'static str]> {
    CONTENT_TYPES
        .iter()
        .find(|(ct, _, _)| *ct == content_type)
        .map(|(_, formats, _)| *formats)
}

/// On-disk extension for a content format
pub fn format_extension(content_format: &str) -> Option<&'static str> {
    FORMAT_EXTENSIONS
        .iter()
        .find(|(fmt, _)| *fmt == content_format)
        .map(|(_, ext)| *ext)
}

/// Whether the content type permits the content format
pub fn is_permitted_combination(content_type: &str, content_format: &str) -> bool {
    match allowed_formats(content_type) {
        Some(formats) => {
            format_extension(content_format).is_some() && formats.contains(&content_format)
        }
        None => false,
    }
}

pub fn is_valid_milestone(milestone: &str) -> bool {
    MILESTONES.contains(&milestone)
}

/// Lower-case the repository type and strip the legacy prefix, returning the
/// canonical directory name, or None when the type is not in the catalog.
pub fn normalize_repository_type(repository_type: &str) -> Option<String> {
    let lower = repository_type.to_lowercase();
    if !REPOSITORY_TYPES.contains(&lower.as_str()) {
        return None;
    }
    Some(lower.replace("onedep-", ""))
}
