//! Pluggable format conversion ahead of the copy.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Converts a source file into another on-disk format (e.g. disc images to
/// a compressed container). Runs on a blocking thread.
pub trait Converter: Send + Sync {
    /// Format this converter produces, matched against
    /// `DeploymentItem::target_format`.
    fn target_format(&self) -> &str;

    fn convert(&self, source: &Path, output: &Path) -> io::Result<()>;
}

/// Converters keyed by target format.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    by_format: HashMap<String, Arc<dyn Converter>>,
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `converter`, replacing any previous one for its format.
    pub fn register(&mut self, converter: Arc<dyn Converter>) {
        self.by_format
            .insert(converter.target_format().to_ascii_lowercase(), converter);
    }

    pub fn get(&self, format: &str) -> Option<Arc<dyn Converter>> {
        self.by_format.get(&format.to_ascii_lowercase()).cloned()
    }

    pub fn formats(&self) -> Vec<&str> {
        let mut formats: Vec<&str> = self.by_format.keys().map(String::as_str).collect();
        formats.sort_unstable();
        formats
    }
}

/// Destination path for an item copied without its planned conversion:
/// the planned name with the source's extension.
pub(crate) fn unconverted_dest(dest_path: &str, source: &Path) -> String {
    let (dir, name) = match dest_path.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, dest_path),
    };
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    let file = match source.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_string(),
    };
    match dir {
        Some(dir) => format!("{dir}/{file}"),
        None => file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Converter for Noop {
        fn target_format(&self) -> &str {
            "CHD"
        }

        fn convert(&self, source: &Path, output: &Path) -> io::Result<()> {
            std::fs::copy(source, output).map(|_| ())
        }
    }

    #[test]
    fn lookup_ignores_case() {
        let mut reg = ConverterRegistry::new();
        reg.register(Arc::new(Noop));
        assert!(reg.get("chd").is_some());
        assert!(reg.get("Chd").is_some());
        assert!(reg.get("cso").is_none());
        assert_eq!(reg.formats(), vec!["chd"]);
    }

    #[test]
    fn unconverted_keeps_source_extension() {
        assert_eq!(
            unconverted_dest("Roms/psx/Game.chd", Path::new("/lib/Game.cue")),
            "Roms/psx/Game.cue"
        );
        assert_eq!(unconverted_dest("Game.chd", Path::new("/lib/Game.iso")), "Game.iso");
        assert_eq!(unconverted_dest("Roms/x/Game", Path::new("/lib/Game")), "Roms/x/Game");
    }
}
