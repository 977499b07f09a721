use std::fmt;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};

/// Stable identifier for a definition in the analysed tree: the file it
/// lives in plus its qualified name. Replaces object identity, so two
/// resolutions of the same function compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId {
    /// File path
    pub file_path: PathBuf,
    /// Qualified name (`func`, `Class.method`, `outer.<locals>.inner`)
    pub qualname: String,
}

impl SymbolId {
    pub fn new(file_path: impl Into<PathBuf>, qualname: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            qualname: qualname.into(),
        }
    }

    /// Last segment of the qualified name
    pub fn name(&self) -> &str {
        self.qualname.rsplit('.').next().unwrap_or(&self.qualname)
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.file_path.display(), self.qualname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let method = SymbolId::new("app/service.py", "UserService.create");
        assert_eq!(method.name(), "create");
        assert_eq!(method.to_string(), "app/service.py::UserService.create");

        let nested = SymbolId::new("app/main.py", "create_app.<locals>.root");
        assert_eq!(nested.name(), "root");
        assert_eq!(SymbolId::new("m.py", "f").name(), "f");
    }
}
