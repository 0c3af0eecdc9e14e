use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One detection in original image pixels.
///
/// `confidence` is `objectness * class_score` and stays server-side: the
/// response line only carries the box and class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: f32,
    pub class_id: u32,
}

/// The part of a [`Detection`] that travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub class_id: u32,
}

impl From<&Detection> for ResponseBox {
    fn from(det: &Detection) -> Self {
        Self {
            x: det.x,
            y: det.y,
            width: det.width,
            height: det.height,
            class_id: det.class_id,
        }
    }
}

/// Text encoding of a response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    /// `[x,y,w,h,cls,x,y,w,h,cls]\n`, `[]\n` when empty.
    #[default]
    Bracketed,
    /// `x,y,w,h,cls;x,y,w,h,cls;\n`, a bare `\n` when empty.
    Semicolon,
}

impl ResponseFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::Bracketed => "bracketed",
            ResponseFormat::Semicolon => "semicolon",
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bracketed" | "brackets" | "json" => Ok(ResponseFormat::Bracketed),
            "semicolon" | "csv" => Ok(ResponseFormat::Semicolon),
            other => Err(format!("unknown response format '{}'", other)),
        }
    }
}
