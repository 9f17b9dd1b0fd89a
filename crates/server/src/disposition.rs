// crates/server/src/disposition.rs
//! Download headers for finished report content.
//!
//! The served filename is the report's base name with its extension swapped
//! for one matching the output MIME type, so `/reports/sales.prpt` rendered
//! as CSV downloads as `sales.csv`.

/// Extensions for the formats report engines commonly emit, checked before
/// the general MIME database so the common cases are stable.
const PREFERRED_EXTENSIONS: &[(&str, &str)] = &[
    ("text/csv", "csv"),
    ("application/pdf", "pdf"),
    ("text/html", "html"),
    ("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet", "xlsx"),
    ("application/vnd.ms-excel", "xls"),
    ("application/rtf", "rtf"),
    ("text/plain", "txt"),
    ("text/xml", "xml"),
    ("application/xml", "xml"),
];

/// Header values for a content download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHeaders {
    /// `Content-Disposition` value.
    pub disposition: String,
    /// `Content-Description` value: the original report name.
    pub description: String,
}

/// Last path segment of a repository path.
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// File extension for `mime_type`, ignoring parameters such as `charset`.
pub fn extension_for(mime_type: &str) -> Option<&'static str> {
    let essence = mime_type.split(';').next().unwrap_or(mime_type).trim();
    let essence = essence.to_ascii_lowercase();
    PREFERRED_EXTENSIONS
        .iter()
        .find(|(mime, _)| *mime == essence)
        .map(|(_, ext)| *ext)
        .or_else(|| {
            mime_guess::get_mime_extensions_str(&essence).and_then(|exts| exts.first().copied())
        })
}

/// Download filename for a report at `path` rendered as `mime_type`.
///
/// Keeps the base name unchanged when the MIME type is unknown.
pub fn content_filename(path: &str, mime_type: Option<&str>) -> String {
    let base = base_name(path);
    let Some(ext) = mime_type.and_then(extension_for) else {
        return base.to_string();
    };
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    };
    format!("{stem}.{ext}")
}

/// Build `Content-Disposition` and `Content-Description` for a download.
///
/// The filename is always sent in RFC 5987 form so non-ASCII names survive.
pub fn content_headers(path: &str, mime_type: Option<&str>) -> ContentHeaders {
    let filename = content_filename(path, mime_type);
    ContentHeaders {
        disposition: format!("inline; filename*=UTF-8''{}", urlencoding::encode(&filename)),
        description: urlencoding::encode(base_name(path)).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_csv_rewrites_extension() {
        let headers = content_headers("/somepath/anotherlevel/file.prpt", Some("text/csv"));
        assert_eq!(
            headers,
            ContentHeaders {
                disposition: "inline; filename*=UTF-8''file.csv".to_string(),
                description: "file.prpt".to_string(),
            }
        );
    }

    #[test]
    fn test_mime_parameters_ignored() {
        assert_eq!(
            content_filename("/r/sales.prpt", Some("text/html; charset=UTF-8")),
            "sales.html"
        );
        assert_eq!(content_filename("/r/sales.prpt", Some("APPLICATION/PDF")), "sales.pdf");
    }

    #[test]
    fn test_spreadsheet_types() {
        assert_eq!(
            content_filename(
                "/r/q3.prpt",
                Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")
            ),
            "q3.xlsx"
        );
        assert_eq!(content_filename("/r/q3.prpt", Some("application/vnd.ms-excel")), "q3.xls");
    }

    #[test]
    fn test_unknown_or_missing_mime_keeps_name() {
        assert_eq!(content_filename("/r/q3.prpt", None), "q3.prpt");
        assert_eq!(content_filename("/r/q3.prpt", Some("x-unknown/x-nothing")), "q3.prpt");
    }

    #[test]
    fn test_name_without_extension() {
        assert_eq!(content_filename("/r/summary", Some("application/pdf")), "summary.pdf");
        assert_eq!(content_filename("/r/.hidden", Some("text/csv")), ".hidden.csv");
    }

    #[test]
    fn test_non_ascii_name_is_percent_encoded() {
        let headers = content_headers("/berichte/umsätze 2024.prpt", Some("application/pdf"));
        assert_eq!(
            headers.disposition,
            "inline; filename*=UTF-8''ums%C3%A4tze%202024.pdf"
        );
        assert_eq!(headers.description, "ums%C3%A4tze%202024.prpt");
    }
}
