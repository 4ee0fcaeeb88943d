use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Compiled code for a single script entry point
///
/// The bytes are a Lua binary chunk produced by the compiler. They are never
/// mutated after creation, and cloning only bumps a reference count, so one
/// `Bytecode` can back any number of concurrent interactions.
#[derive(Clone, PartialEq, Eq)]
pub struct Bytecode {
    bytes: Arc<[u8]>,
}

impl Bytecode {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::from(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Bytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bytecode")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Placement data and entry code extracted from a script file
///
/// The server uses this to define the entity on its map.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptMetadata {
    /// Source file the metadata was extracted from
    pub path: PathBuf,
    /// Map the entity is placed on
    pub map: String,
    pub x: i32,
    pub y: i32,
    pub facing: i32,
    /// Display name
    pub name: String,
    /// Sprite id
    pub sprite: i32,
    /// Entry behavior; `None` when the script defines no `script` function
    #[serde(skip)]
    pub code: Option<Bytecode>,
}

impl ScriptMetadata {
    /// Whether the entity has any behavior to run
    pub fn has_code(&self) -> bool {
        self.code.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytecode_clone_shares_buffer() {
        let code = Bytecode::new(vec![0x1b, b'L', b'u', b'a']);
        let copy = code.clone();

        assert_eq!(code, copy);
        assert!(std::ptr::eq(code.as_bytes(), copy.as_bytes()));
        assert_eq!(copy.len(), 4);
    }

    #[test]
    fn test_bytecode_debug_hides_bytes() {
        let code = Bytecode::new(vec![1, 2, 3]);
        assert_eq!(format!("{:?}", code), "Bytecode { len: 3 }");
    }
}
