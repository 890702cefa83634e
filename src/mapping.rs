//! Inline source maps.
//!
//! Maps are assembled with the `sourcemap` builder and embedded into the
//! generated file as a base64 data URL, so development builds need no extra
//! `.map` files next to the assets.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sourcemap::{SourceMap, SourceMapBuilder};

/// A map under construction. All positions are zero based.
pub struct InlineMap {
    builder: SourceMapBuilder,
}

impl InlineMap {
    pub fn new(file: &str) -> Self {
        Self {
            builder: SourceMapBuilder::new(Some(file)),
        }
    }

    /// Register a source file with its full content and return its index.
    pub fn add_source(&mut self, name: &str, content: &str) -> u32 {
        let id = self.builder.add_source(name);
        self.builder.set_source_contents(id, Some(content));
        id
    }

    /// Map a generated position to a position in a registered source.
    /// Generated positions must be added in increasing order.
    pub fn add(&mut self, line: u32, column: u32, source: u32, source_line: u32, source_column: u32) {
        self.builder
            .add_raw(line, column, source_line, source_column, Some(source), None, false);
    }

    pub fn into_map(self) -> SourceMap {
        self.builder.into_sourcemap()
    }

    pub fn to_data_url(self) -> Result<String, sourcemap::Error> {
        let mut json = Vec::new();
        self.into_map().to_writer(&mut json)?;
        Ok(format!(
            "data:application/json;charset=utf-8;base64,{}",
            STANDARD.encode(json)
        ))
    }

    /// The trailing comment linking a stylesheet to this map.
    pub fn css_comment(self) -> Result<String, sourcemap::Error> {
        Ok(format!("/*# sourceMappingURL={} */", self.to_data_url()?))
    }

    /// The trailing comment linking a script to this map.
    pub fn js_comment(self) -> Result<String, sourcemap::Error> {
        Ok(format!("//# sourceMappingURL={}", self.to_data_url()?))
    }
}

/// Decode the map embedded by [`InlineMap::css_comment`] or
/// [`InlineMap::js_comment`] at the end of a generated file.
pub fn embedded(generated: &str) -> Option<SourceMap> {
    let (_, encoded) = generated.rsplit_once("sourceMappingURL=data:application/json;charset=utf-8;base64,")?;
    let encoded = encoded.trim_end().trim_end_matches("*/").trim_end();
    let json = STANDARD.decode(encoded).ok()?;
    SourceMap::from_slice(&json).ok()
}
