use uuid::Uuid;

/// Name of one version of a file in its owner's cloud storage:
/// `{file_uuid}.{device_uuid}.{file_version}[.ext]`.
///
/// `device_uuid` is the device that uploaded the first version, so every
/// version of a file shares its prefix.
pub fn cloud_file_name(
    file_uuid: Uuid,
    device_uuid: Uuid,
    file_version: i64,
    mime_type: Option<&str>,
) -> String {
    let base = format!("{file_uuid}.{device_uuid}.{file_version}");
    match mime_type.and_then(extension_for_mime) {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}

/// Preferred file extension of a MIME type.
///
/// Picks the extension equal to the subtype when the type has one
/// (`image/png` -> `png`), otherwise the first known extension.
pub fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    let essence = mime_type.split(';').next()?.trim().to_ascii_lowercase();
    let extensions = mime_guess::get_mime_extensions_str(&essence)?;
    let subtype = essence.split_once('/').map(|(_, sub)| sub)?;

    extensions
        .iter()
        .find(|ext| **ext == subtype)
        .or_else(|| extensions.first())
        .copied()
}
