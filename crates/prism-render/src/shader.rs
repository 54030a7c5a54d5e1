// SPDX-License-Identifier: CEPL-1.0
use std::io;
use std::path::{Path, PathBuf};

pub const VERTEX_SHADER: &str = "vertex";
pub const FRAGMENT_SHADER: &str = "fragment";

/// Source of compiled shader bytecode, looked up by logical stage name.
pub trait ShaderSource {
    fn load(&self, name: &str) -> io::Result<Vec<u8>>;
}

/// Reads `<root>/<name>.spv` from disk.
#[derive(Clone, Debug)]
pub struct ShaderDir {
    root: PathBuf,
}

impl ShaderDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.spv"))
    }
}

impl ShaderSource for ShaderDir {
    fn load(&self, name: &str) -> io::Result<Vec<u8>> {
        let path = self.path_for(name);
        tracing::debug!("loading shader `{name}` from {}", path.display());
        std::fs::read(&path)
            .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))
    }
}
