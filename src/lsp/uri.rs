//! File-URI normalisation.
//!
//! Editors disagree about how a Windows path becomes a URI. All of the
//! common dialects must resolve to the same local path:
//!
//! ```text
//! file:///c:/Users/x/app.py      (standard)
//! file://localhost/c:/Users/x/app.py
//! file:///c|/Users/x/app.py      (pipe form)
//! file:/c:/Users/x/app.py        (single-slash form)
//! ```
//!
//! Percent-escapes are decoded; on the POSIX side `file:///home/x/a.py`
//! stays `/home/x/a.py`.

use std::path::PathBuf;

/// Convert a `file:` URI to a local path. Returns `None` for other
/// schemes or malformed input.
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file:")?;

    // Strip the authority: `//host/...` or `//`/`///`. A non-local
    // authority other than `localhost` is rejected.
    let path_part = if let Some(with_authority) = rest.strip_prefix("//") {
        match with_authority.find('/') {
            Some(0) => &with_authority[0..],
            Some(slash) => {
                let authority = &with_authority[..slash];
                if !authority.is_empty() && !authority.eq_ignore_ascii_case("localhost") {
                    return None;
                }
                &with_authority[slash..]
            }
            None => return None,
        }
    } else {
        // `file:/c:/...` pipe/single-slash form.
        rest
    };

    let decoded = percent_decode(path_part);
    Some(normalise_path(&decoded))
}

/// Convert a local path back to a `file:` URI for publishing.
pub fn path_to_uri(path: &std::path::Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    let mut encoded = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            ' ' => encoded.push_str("%20"),
            '#' => encoded.push_str("%23"),
            '?' => encoded.push_str("%3F"),
            _ => encoded.push(ch),
        }
    }
    if encoded.starts_with('/') {
        format!("file://{encoded}")
    } else {
        format!("file:///{encoded}")
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let high = (bytes[i + 1] as char).to_digit(16);
            let low = (bytes[i + 2] as char).to_digit(16);
            if let (Some(high), Some(low)) = (high, low) {
                out.push((high * 16 + low) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Apply Windows drive-letter fixups: `|` to `:`, a leading slash in
/// front of `c:/` dropped, the drive letter lowercased.
fn normalise_path(path: &str) -> PathBuf {
    let mut p = path.to_string();

    // `/c|/x` → `/c:/x`
    if p.len() >= 3 {
        let bytes = p.as_bytes();
        if bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b'|' {
            p.replace_range(2..3, ":");
        }
    }

    // `/c:/x` → `c:/x`, with the drive lowercased.
    let is_windows_drive = {
        let bytes = p.as_bytes();
        p.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':'
    };
    if is_windows_drive {
        let drive = p.as_bytes()[1].to_ascii_lowercase() as char;
        let rest = p[3..].to_string();
        return PathBuf::from(format!("{drive}:{rest}"));
    }

    PathBuf::from(p)
}
