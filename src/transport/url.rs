/*!
 * Download-URL derivation
 *
 * Given a file name and its whole-file digest, derives the locator the
 * bundled HTTP transport's merge response is expected to match:
 * `URL-encode(fileName) + "_" + fileHash + "." + last-dot-suffix(fileName)`.
 * Files with no dot use the full name as the suffix.
 */

pub fn derive_download_locator(file_name: &str, file_hash: &str) -> String {
    let encoded = url::form_urlencoded::byte_serialize(file_name.as_bytes()).collect::<String>();
    let suffix = last_dot_suffix(file_name);
    format!("{encoded}_{file_hash}.{suffix}")
}

fn last_dot_suffix(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(pos) if pos + 1 < file_name.len() => &file_name[pos + 1..],
        _ => file_name,
    }
}
