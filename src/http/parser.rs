use std::collections::HashMap;

/// Response headers by name. Later occurrences of a name overwrite earlier ones.
pub type HeaderMap = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Name,
    Value,
}

/// Parses a raw header block as returned by the transport.
///
/// Lines end with `\r\n` (a bare `\n` is accepted too). The block ends at an
/// empty line, a NUL, or end of input. Lines without a colon, such as the
/// status line, are skipped. Values have leading spaces and tabs removed, so
/// `Name: v` and `Name:v` both yield `v`.
pub fn parse_raw_headers(raw: &str) -> HeaderMap {
    let raw = raw.split_once('\0').map_or(raw, |(block, _)| block);

    let mut headers = HeaderMap::new();
    let mut state = ScanState::Name;
    let mut line_start = 0;
    let mut name = "";
    let mut value_start = 0;

    for (i, c) in raw.char_indices() {
        match state {
            ScanState::Name => match c {
                ':' => {
                    name = &raw[line_start..i];
                    value_start = i + 1;
                    state = ScanState::Value;
                }
                '\n' => {
                    if raw[line_start..i].trim_end_matches('\r').is_empty() {
                        return headers;
                    }
                    line_start = i + 1;
                }
                _ => {}
            },
            ScanState::Value => {
                if c == '\n' {
                    insert(&mut headers, name, &raw[value_start..i]);
                    line_start = i + 1;
                    state = ScanState::Name;
                }
            }
        }
    }

    if state == ScanState::Value {
        insert(&mut headers, name, &raw[value_start..]);
    }

    headers
}

fn insert(headers: &mut HeaderMap, name: &str, value: &str) {
    let name = name.trim();
    if name.is_empty() {
        return;
    }

    let value = value
        .trim_end_matches('\r')
        .trim_start_matches([' ', '\t']);

    headers.insert(name.to_string(), value.to_string());
}
