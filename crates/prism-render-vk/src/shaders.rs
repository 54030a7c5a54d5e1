// SPDX-License-Identifier: CEPL-1.0
use std::io;

use prism_render::{ShaderSource, FRAGMENT_SHADER, VERTEX_SHADER};

static VERTEX_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/vertex.spv"));
static FRAGMENT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/fragment.spv"));

/// Bytecode compiled by the build script and linked into the crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbeddedShaders;

impl ShaderSource for EmbeddedShaders {
    fn load(&self, name: &str) -> io::Result<Vec<u8>> {
        match name {
            VERTEX_SHADER => Ok(VERTEX_SPV.to_vec()),
            FRAGMENT_SHADER => Ok(FRAGMENT_SPV.to_vec()),
            other => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no embedded shader named `{other}`"),
            )),
        }
    }
}
