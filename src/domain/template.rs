use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// One piece of an include target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// Literal path text
    Literal(String),
    /// `${Name}` reference to an input
    Input(String),
}

/// Include target as an ordered sequence of literal and interpolated segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathTemplate {
    segments: SmallVec<[Segment; 4]>,
}

impl PathTemplate {
    /// Template with a single literal segment.
    pub fn literal(path: impl Into<String>) -> Self {
        let mut segments = SmallVec::new();
        segments.push(Segment::Literal(path.into()));
        PathTemplate { segments }
    }

    /// Split raw include text into segments.
    ///
    /// `${Name}` introduces an interpolated segment; an unterminated or empty
    /// interpolation is rejected.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut segments: SmallVec<[Segment; 4]> = SmallVec::new();
        let mut rest = raw;

        while let Some(start) = rest.find("${") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| format!("unterminated interpolation in \"{}\"", raw))?;
            let name = after[..end].trim();
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(format!("invalid interpolation `${{{}}}` in \"{}\"", name, raw));
            }
            segments.push(Segment::Input(name.to_string()));
            rest = &after[end + 1..];
        }

        if !rest.is_empty() || segments.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(PathTemplate { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether any segment is interpolated.
    pub fn is_templated(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Input(_)))
    }

    /// Names referenced by interpolated segments, in order.
    pub fn inputs(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Input(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Concatenate the segments, looking up each interpolated name.
    ///
    /// Returns the first name `lookup` cannot bind as the error.
    pub fn render<F>(&self, mut lookup: F) -> Result<String, String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        self.segments
            .iter()
            .try_fold(String::new(), |mut path, segment| {
                match segment {
                    Segment::Literal(text) => path.push_str(text),
                    Segment::Input(name) => {
                        let value = lookup(name).ok_or_else(|| name.clone())?;
                        path.push_str(&value);
                    }
                }
                Ok(path)
            })
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => write!(f, "{}", text)?,
                Segment::Input(name) => write!(f, "${{{}}}", name)?,
            }
        }
        Ok(())
    }
}
