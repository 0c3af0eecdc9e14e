use crate::{Detection, ResponseBox, ResponseFormat, WireError};
use std::fmt::Write;

const FIELDS_PER_BOX: usize = 5;

/// Encode `detections` as one newline-terminated response line.
pub fn encode_response(detections: &[Detection], format: ResponseFormat) -> String {
    let mut line = String::with_capacity(2 + detections.len() * 24);
    encode_response_into(&mut line, detections, format);
    line
}

/// Like [`encode_response`] but writes into `line`, which is cleared first.
pub fn encode_response_into(line: &mut String, detections: &[Detection], format: ResponseFormat) {
    line.clear();

    // Writing into a String cannot fail.
    match format {
        ResponseFormat::Bracketed => {
            line.push('[');
            for (i, d) in detections.iter().enumerate() {
                if i > 0 {
                    line.push(',');
                }
                let _ = write!(line, "{},{},{},{},{}", d.x, d.y, d.width, d.height, d.class_id);
            }
            line.push(']');
        }
        ResponseFormat::Semicolon => {
            for d in detections {
                let _ = write!(line, "{},{},{},{},{};", d.x, d.y, d.width, d.height, d.class_id);
            }
        }
    }

    line.push('\n');
}

/// Parse a response line in either encoding. The trailing newline is
/// optional.
pub fn parse_response(line: &str) -> Result<Vec<ResponseBox>, WireError> {
    let line = line.trim_end_matches(['\n', '\r']).trim();

    if let Some(rest) = line.strip_prefix('[') {
        let inner = rest
            .strip_suffix(']')
            .ok_or_else(|| WireError::MalformedResponse("missing closing ']'".into()))?;
        parse_flat(inner)
    } else {
        line.split(';')
            .map(str::trim)
            .filter(|record| !record.is_empty())
            .map(|record| {
                let boxes = parse_flat(record)?;
                match boxes.as_slice() {
                    [single] => Ok(*single),
                    _ => Err(WireError::MalformedResponse(format!(
                        "record '{}' must have {} fields",
                        record, FIELDS_PER_BOX
                    ))),
                }
            })
            .collect()
    }
}

/// Parse a comma-separated run of integers into groups of five.
fn parse_flat(fields: &str) -> Result<Vec<ResponseBox>, WireError> {
    if fields.trim().is_empty() {
        return Ok(Vec::new());
    }

    let values = fields
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<i64>()
                .map_err(|_| WireError::MalformedResponse(format!("not an integer: '{}'", v)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if values.len() % FIELDS_PER_BOX != 0 {
        return Err(WireError::MalformedResponse(format!(
            "{} fields is not a multiple of {}",
            values.len(),
            FIELDS_PER_BOX
        )));
    }

    values
        .chunks_exact(FIELDS_PER_BOX)
        .map(|c| {
            let narrow = |v: i64| {
                i32::try_from(v)
                    .map_err(|_| WireError::MalformedResponse(format!("out of range: {}", v)))
            };
            Ok(ResponseBox {
                x: narrow(c[0])?,
                y: narrow(c[1])?,
                width: narrow(c[2])?,
                height: narrow(c[3])?,
                class_id: u32::try_from(c[4]).map_err(|_| {
                    WireError::MalformedResponse(format!("invalid class id: {}", c[4]))
                })?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: i32, y: i32, w: i32, h: i32, class_id: u32) -> Detection {
        Detection {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            class_id,
        }
    }

    #[test]
    fn test_bracketed_encoding() {
        let dets = [det(540, 260, 200, 200, 3), det(-4, 0, 10, 12, 0)];

        assert_eq!(
            encode_response(&dets, ResponseFormat::Bracketed),
            "[540,260,200,200,3,-4,0,10,12,0]\n"
        );
        assert_eq!(encode_response(&[], ResponseFormat::Bracketed), "[]\n");
    }

    #[test]
    fn test_semicolon_encoding() {
        let dets = [det(540, 260, 200, 200, 3), det(1, 2, 3, 4, 5)];

        assert_eq!(
            encode_response(&dets, ResponseFormat::Semicolon),
            "540,260,200,200,3;1,2,3,4,5;\n"
        );
        assert_eq!(encode_response(&[], ResponseFormat::Semicolon), "\n");
    }

    #[test]
    fn test_encode_into_clears_previous_line() {
        let mut line = String::from("stale");
        encode_response_into(&mut line, &[det(1, 1, 1, 1, 1)], ResponseFormat::Bracketed);
        assert_eq!(line, "[1,1,1,1,1]\n");
    }

    #[test]
    fn test_parse_accepts_both_encodings() {
        let expected = vec![
            ResponseBox {
                x: 540,
                y: 260,
                width: 200,
                height: 200,
                class_id: 3,
            },
            ResponseBox {
                x: -4,
                y: 0,
                width: 10,
                height: 12,
                class_id: 0,
            },
        ];

        assert_eq!(
            parse_response("[540,260,200,200,3,-4,0,10,12,0]\n").unwrap(),
            expected
        );
        assert_eq!(
            parse_response("540,260,200,200,3;-4,0,10,12,0;\r\n").unwrap(),
            expected
        );
    }

    #[test]
    fn test_parse_empty_lines() {
        assert!(parse_response("[]\n").unwrap().is_empty());
        assert!(parse_response("\n").unwrap().is_empty());
        assert!(parse_response("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        for bad in [
            "[1,2,3,4]",
            "[1,2,3,4,5",
            "1,2,3,4;",
            "1,2,3,4,5,6,7,8,9,10;",
            "[a,b,c,d,e]",
            "[1,2,3,4,-1]",
        ] {
            assert!(
                matches!(parse_response(bad), Err(WireError::MalformedResponse(_))),
                "'{}' should be rejected",
                bad
            );
        }
    }
}
