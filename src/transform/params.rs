use crate::ProxyError;
use serde::Deserialize;
use std::fmt;

/// Largest width or height accepted for either operation.
pub const MAX_DIMENSION: u32 = 8192;

/// The two supported transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Crop-to-fill: output exactly covers the box, excess is discarded
    Fit,
    /// Proportional resize to a target width
    Resize,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Fit => "fit",
            Operation::Resize => "resize",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query string of both image routes.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct SizeQuery {
    /// `WxH` for fit, `W` for resize
    #[serde(default)]
    pub size: Option<String>,
}

/// Validated target geometry for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Geometry {
    Fit { width: u32, height: u32 },
    Resize { width: u32 },
}

impl Geometry {
    /// Parses the `size` query value for `op`.
    ///
    /// Runs before any network or disk work; every failure is a client error.
    pub fn parse(op: Operation, size: Option<&str>) -> Result<Self, ProxyError> {
        match op {
            Operation::Fit => {
                let size = size.filter(|s| s.contains('x')).ok_or_else(|| {
                    ProxyError::InvalidArgument(
                        "Size query param must be like wxh, e.g. 300x200".into(),
                    )
                })?;
                let mut parts = size.split('x');
                let (Some(w), Some(h), None) = (parts.next(), parts.next(), parts.next()) else {
                    return Err(ProxyError::InvalidArgument("Invalid size parameters".into()));
                };
                let invalid = || ProxyError::InvalidArgument("Invalid size parameters".into());
                let width = parse_dimension(w).ok_or_else(invalid)?;
                let height = parse_dimension(h).ok_or_else(invalid)?;
                Geometry::Fit { width, height }.bounded()
            }
            Operation::Resize => {
                let size = size.filter(|s| !s.is_empty()).ok_or_else(|| {
                    ProxyError::InvalidArgument("Size query param required".into())
                })?;
                let width = parse_dimension(size)
                    .ok_or_else(|| ProxyError::InvalidArgument("Invalid size parameter".into()))?;
                Geometry::Resize { width }.bounded()
            }
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Geometry::Fit { .. } => Operation::Fit,
            Geometry::Resize { .. } => Operation::Resize,
        }
    }

    fn bounded(self) -> Result<Self, ProxyError> {
        let largest = match self {
            Geometry::Fit { width, height } => width.max(height),
            Geometry::Resize { width } => width,
        };
        if largest > MAX_DIMENSION {
            return Err(ProxyError::InvalidArgument(format!(
                "Size exceeds maximum dimension of {}",
                MAX_DIMENSION
            )));
        }
        Ok(self)
    }
}

/// Cache-key encoding: `300x200` for fit, `300` for resize.
impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Geometry::Fit { width, height } => write!(f, "{}x{}", width, height),
            Geometry::Resize { width } => write!(f, "{}", width),
        }
    }
}

fn parse_dimension(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u32>().ok().filter(|&v| v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(err: ProxyError) -> String {
        match err {
            ProxyError::InvalidArgument(m) => m,
            other => panic!("expected client error, got {:?}", other),
        }
    }

    #[test]
    fn parses_fit_geometry() {
        let g = Geometry::parse(Operation::Fit, Some("300x200")).unwrap();
        assert_eq!(g, Geometry::Fit { width: 300, height: 200 });
        assert_eq!(g.to_string(), "300x200");
        assert_eq!(g.operation(), Operation::Fit);
    }

    #[test]
    fn parses_resize_geometry() {
        let g = Geometry::parse(Operation::Resize, Some("640")).unwrap();
        assert_eq!(g, Geometry::Resize { width: 640 });
        assert_eq!(g.to_string(), "640");
    }

    #[test]
    fn fit_requires_separator() {
        let err = Geometry::parse(Operation::Fit, Some("300")).unwrap_err();
        assert!(message(err).contains("wxh"));
        assert!(Geometry::parse(Operation::Fit, None).is_err());
    }

    #[test]
    fn fit_rejects_malformed_components() {
        for size in ["abcx200", "300x", "x200", "1x2x3", "3.5x2", "-1x5", "+3x2", " 3x2"] {
            let err = Geometry::parse(Operation::Fit, Some(size)).unwrap_err();
            assert_eq!(message(err), "Invalid size parameters", "size={}", size);
        }
    }

    #[test]
    fn zero_area_is_rejected() {
        assert!(Geometry::parse(Operation::Fit, Some("0x0")).is_err());
        assert!(Geometry::parse(Operation::Fit, Some("300x0")).is_err());
        assert!(Geometry::parse(Operation::Resize, Some("0")).is_err());
    }

    #[test]
    fn resize_requires_value() {
        assert_eq!(
            message(Geometry::parse(Operation::Resize, Some("")).unwrap_err()),
            "Size query param required"
        );
        assert_eq!(
            message(Geometry::parse(Operation::Resize, None).unwrap_err()),
            "Size query param required"
        );
        assert_eq!(
            message(Geometry::parse(Operation::Resize, Some("wide")).unwrap_err()),
            "Invalid size parameter"
        );
    }

    #[test]
    fn rejects_oversized_dimensions() {
        assert!(Geometry::parse(Operation::Resize, Some("8192")).is_ok());
        assert!(Geometry::parse(Operation::Resize, Some("8193")).is_err());
        assert!(Geometry::parse(Operation::Fit, Some("100x99999")).is_err());
        assert!(Geometry::parse(Operation::Resize, Some("99999999999")).is_err());
    }
}
