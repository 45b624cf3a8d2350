//! OData percent-encoding
//!
//! Values are percent-encoded except for `,` and `=`, which OData keeps
//! literal in lists and composite keys. Parameter names keep their `$`.

pub(crate) fn encode_segment(value: &str) -> String {
    urlencoding::encode(value)
        .replace("%2C", ",")
        .replace("%3D", "=")
}

pub(crate) fn encode_key(key: &str) -> String {
    encode_segment(key).replace("%24", "$")
}
