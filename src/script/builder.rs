//! Typed instruction list and one-pass serializer.

use bitcoin::ScriptBuf;

use super::opcodes::*;
use super::ScriptError;

/// One script element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// A bare opcode
    Op(u8),
    /// Data pushed with the minimal length prefix for its size
    Push(Vec<u8>),
}

impl Instruction {
    pub fn is_push(&self) -> bool {
        matches!(self, Instruction::Push(_))
    }

    pub fn push_data(&self) -> Option<&[u8]> {
        match self {
            Instruction::Push(data) => Some(data),
            Instruction::Op(_) => None,
        }
    }

    /// Append the wire encoding of this element to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Instruction::Op(op) => out.push(*op),
            Instruction::Push(data) => encode_push_into(data, out),
        }
    }
}

/// Encode a data push: empty → OP_0, <76 direct, then PUSHDATA1/2/4
pub fn encode_push_into(data: &[u8], out: &mut Vec<u8>) {
    let len = data.len();
    if len == 0 {
        out.push(OP_0);
        return;
    }
    if len <= MAX_DIRECT_PUSH {
        out.push(len as u8);
    } else if len <= 0xff {
        out.push(OP_PUSHDATA1);
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(OP_PUSHDATA2);
        out.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        out.push(OP_PUSHDATA4);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
    out.extend_from_slice(data);
}

pub fn encode_push(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 5);
    encode_push_into(data, &mut out);
    out
}

/// Accumulates instructions and serializes them once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptBuilder {
    instructions: Vec<Instruction>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(mut self, opcode: u8) -> Self {
        self.instructions.push(Instruction::Op(opcode));
        self
    }

    pub fn op_n(mut self, opcode: u8, count: usize) -> Self {
        self.instructions
            .extend(std::iter::repeat(Instruction::Op(opcode)).take(count));
        self
    }

    pub fn push(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.instructions.push(Instruction::Push(data.into()));
        self
    }

    pub fn push_str(self, s: &str) -> Self {
        self.push(s.as_bytes().to_vec())
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of data pushes (opcodes excluded)
    pub fn push_count(&self) -> usize {
        self.instructions.iter().filter(|i| i.is_push()).count()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for instruction in &self.instructions {
            instruction.encode_into(&mut out);
        }
        out
    }

    pub fn into_script(self) -> ScriptBuf {
        ScriptBuf::from_bytes(self.to_bytes())
    }
}

/// Decode raw script bytes into instructions
pub fn decode(bytes: &[u8]) -> Result<Vec<Instruction>, ScriptError> {
    let mut out = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let opcode = bytes[pos];
        let offset = pos;
        pos += 1;

        let len = match opcode {
            OP_0 => {
                out.push(Instruction::Push(Vec::new()));
                continue;
            }
            0x01..=0x4b => opcode as usize,
            OP_PUSHDATA1 => read_len(bytes, &mut pos, 1, opcode, offset)?,
            OP_PUSHDATA2 => read_len(bytes, &mut pos, 2, opcode, offset)?,
            OP_PUSHDATA4 => read_len(bytes, &mut pos, 4, opcode, offset)?,
            _ => {
                out.push(Instruction::Op(opcode));
                continue;
            }
        };

        let available = bytes.len() - pos;
        if len > available {
            return Err(ScriptError::TruncatedPush {
                offset,
                declared: len,
                available,
            });
        }
        out.push(Instruction::Push(bytes[pos..pos + len].to_vec()));
        pos += len;
    }

    Ok(out)
}

fn read_len(bytes: &[u8], pos: &mut usize, width: usize, opcode: u8, offset: usize) -> Result<usize, ScriptError> {
    if *pos + width > bytes.len() {
        return Err(ScriptError::MissingLength { opcode, offset });
    }
    let mut buf = [0u8; 4];
    buf[..width].copy_from_slice(&bytes[*pos..*pos + width]);
    *pos += width;
    Ok(u32::from_le_bytes(buf) as usize)
}

// =============================================================================
// Templates
// =============================================================================

/// OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG
pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> ScriptBuf {
    ScriptBuilder::new()
        .op(OP_DUP)
        .op(OP_HASH160)
        .push(pubkey_hash.to_vec())
        .op(OP_EQUALVERIFY)
        .op(OP_CHECKSIG)
        .into_script()
}

/// OP_HASH160 <hash> OP_EQUAL
pub fn p2sh_script(script_hash: &[u8; 20]) -> ScriptBuf {
    ScriptBuilder::new()
        .op(OP_HASH160)
        .push(script_hash.to_vec())
        .op(OP_EQUAL)
        .into_script()
}

/// OP_FALSE OP_RETURN <field>...
pub fn data_carrier_script(fields: &[Vec<u8>]) -> ScriptBuf {
    fields
        .iter()
        .fold(ScriptBuilder::new().op(OP_FALSE).op(OP_RETURN), |b, f| {
            b.push(f.clone())
        })
        .into_script()
}

/// Fields of a data carrier output, or `None` for any other script
pub fn parse_data_carrier(script: &[u8]) -> Option<Vec<Vec<u8>>> {
    let instructions = decode(script).ok()?;
    let rest = match instructions.as_slice() {
        [Instruction::Push(first), Instruction::Op(OP_RETURN), rest @ ..] if first.is_empty() => rest,
        [Instruction::Op(OP_RETURN), rest @ ..] => rest,
        _ => return None,
    };
    rest.iter()
        .map(|i| i.push_data().map(|d| d.to_vec()))
        .collect()
}

/// Extract the pubkey hash from a P2PKH script
pub fn p2pkh_hash(script: &[u8]) -> Result<[u8; 20], ScriptError> {
    match decode(script)?.as_slice() {
        [Instruction::Op(OP_DUP), Instruction::Op(OP_HASH160), Instruction::Push(hash), Instruction::Op(OP_EQUALVERIFY), Instruction::Op(OP_CHECKSIG)]
            if hash.len() == 20 =>
        {
            let mut out = [0u8; 20];
            out.copy_from_slice(hash);
            Ok(out)
        }
        _ => Err(ScriptError::UnexpectedTemplate("P2PKH")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_thresholds() {
        assert_eq!(encode_push(&[]), vec![OP_0]);
        assert_eq!(encode_push(&[0xaa])[0], 1);
        assert_eq!(encode_push(&[0u8; 75])[0], 75);
        assert_eq!(&encode_push(&[0u8; 76])[..2], &[OP_PUSHDATA1, 76]);
        assert_eq!(&encode_push(&[0u8; 255])[..2], &[OP_PUSHDATA1, 255]);
        assert_eq!(&encode_push(&[0u8; 256])[..3], &[OP_PUSHDATA2, 0x00, 0x01]);
        assert_eq!(
            &encode_push(&vec![0u8; 65536])[..5],
            &[OP_PUSHDATA4, 0x00, 0x00, 0x01, 0x00]
        );
    }

    #[test]
    fn test_decode_truncated() {
        let err = decode(&[OP_PUSHDATA1, 10, 1, 2]).unwrap_err();
        assert_eq!(
            err,
            ScriptError::TruncatedPush {
                offset: 0,
                declared: 10,
                available: 2
            }
        );
        assert!(matches!(
            decode(&[OP_PUSHDATA2, 1]),
            Err(ScriptError::MissingLength { .. })
        ));
    }

    #[test]
    fn test_data_carrier_fields() {
        let fields = vec![b"metaid".to_vec(), b"create".to_vec(), Vec::new(), vec![7u8; 300]];
        let script = data_carrier_script(&fields);
        assert_eq!(&script.as_bytes()[..2], &[OP_FALSE, OP_RETURN]);
        assert_eq!(parse_data_carrier(script.as_bytes()).unwrap(), fields);

        let p2pkh = p2pkh_script(&[1u8; 20]);
        assert!(parse_data_carrier(p2pkh.as_bytes()).is_none());
        assert_eq!(p2pkh_hash(p2pkh.as_bytes()).unwrap(), [1u8; 20]);
    }

    #[test]
    fn test_push_count_ignores_opcodes() {
        let builder = ScriptBuilder::new().push_str("a").op(OP_DROP).push(Vec::new());
        assert_eq!(builder.push_count(), 2);
        assert_eq!(builder.to_bytes(), vec![1, b'a', OP_DROP, OP_0]);
    }
}
