//! The persisted bytecode container (spec section 6, "Bytecode container").
//!
//! `magic "OURO", format version (u16), optimisation level (u8), target
//! platform tag (varint string), compile timestamp (u64 ms)` followed by
//! the serialized `CompiledProgram` tables and instruction stream. The
//! header fields are read back out before deserializing the body so a
//! version mismatch or a foreign file is rejected without ever handing
//! bincode garbage bytes.

use ouro_core::program::CompiledProgram;

pub const MAGIC: &[u8; 4] = b"OURO";
pub const FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ContainerError {
    #[error("not a bytecode container (bad magic)")]
    BadMagic,
    #[error("unsupported container format version {0}")]
    UnsupportedVersion(u16),
    #[error("truncated container")]
    Truncated,
    #[error("failed to decode container body: {0}")]
    Decode(String),
    #[error("failed to encode container body: {0}")]
    Encode(String),
}

/// True if `bytes` starts with the container magic, used by the driver to
/// tell a precompiled container apart from `.ouro` source text.
pub fn is_container(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

pub fn write(program: &CompiledProgram) -> Result<Vec<u8>, ContainerError> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(program.metadata.optimization_level);
    write_varint_string(&mut out, &program.metadata.target_platform);
    out.extend_from_slice(&program.metadata.compile_timestamp_ms.to_le_bytes());
    let body = bincode::serialize(program).map_err(|e| ContainerError::Encode(e.to_string()))?;
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn read(bytes: &[u8]) -> Result<CompiledProgram, ContainerError> {
    if bytes.len() < MAGIC.len() {
        return Err(ContainerError::Truncated);
    }
    if !is_container(bytes) {
        return Err(ContainerError::BadMagic);
    }
    let mut cursor = MAGIC.len();

    let version = read_u16(bytes, &mut cursor)?;
    if version != FORMAT_VERSION {
        return Err(ContainerError::UnsupportedVersion(version));
    }

    let _optimization_level = read_u8(bytes, &mut cursor)?;
    let _target_platform = read_varint_string(bytes, &mut cursor)?;
    let _compile_timestamp_ms = read_u64(bytes, &mut cursor)?;

    bincode::deserialize(&bytes[cursor..]).map_err(|e| ContainerError::Decode(e.to_string()))
}

fn write_varint_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let mut len = bytes.len() as u64;
    loop {
        let mut byte = (len & 0x7f) as u8;
        len >>= 7;
        if len != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
    out.extend_from_slice(bytes);
}

fn read_varint_string(bytes: &[u8], cursor: &mut usize) -> Result<String, ContainerError> {
    let mut len: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = read_u8(bytes, cursor)?;
        len |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let len = len as usize;
    if *cursor + len > bytes.len() {
        return Err(ContainerError::Truncated);
    }
    let s = std::str::from_utf8(&bytes[*cursor..*cursor + len])
        .map_err(|e| ContainerError::Decode(e.to_string()))?
        .to_string();
    *cursor += len;
    Ok(s)
}

fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8, ContainerError> {
    let b = *bytes.get(*cursor).ok_or(ContainerError::Truncated)?;
    *cursor += 1;
    Ok(b)
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Result<u16, ContainerError> {
    let slice = bytes.get(*cursor..*cursor + 2).ok_or(ContainerError::Truncated)?;
    *cursor += 2;
    Ok(u16::from_le_bytes([slice[0], slice[1]]))
}

fn read_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64, ContainerError> {
    let slice = bytes.get(*cursor..*cursor + 8).ok_or(ContainerError::Truncated)?;
    *cursor += 8;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(slice);
    Ok(u64::from_le_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ouro_compiler::compile;

    #[test]
    fn round_trips_a_compiled_program() {
        let program = compile("let x = 1;", "inline.ouro").unwrap();
        let bytes = write(&program).unwrap();
        assert!(is_container(&bytes));
        let back = read(&bytes).unwrap();
        assert_eq!(program.bytecode, back.bytecode);
        assert_eq!(program.constant_pool, back.constant_pool);
    }

    #[test]
    fn rejects_bad_magic() {
        let result = read(b"nope, not a container at all");
        assert!(matches!(result, Err(ContainerError::BadMagic)));
    }

    #[test]
    fn rejects_truncated_header() {
        let result = read(b"OUR");
        assert!(matches!(result, Err(ContainerError::Truncated)));
    }
}
