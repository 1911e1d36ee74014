//! Claim script codec.
//!
//! Claim-bearing outputs prefix an ordinary payee script with one of three
//! claim operations:
//!
//! ```text
//! OP_CLAIM_NAME    <name> <value>             OP_2DROP OP_DROP  <payee>
//! OP_SUPPORT_CLAIM <name> <claim id>          OP_2DROP OP_DROP  <payee>
//! OP_UPDATE_CLAIM  <name> <claim id> <value>  OP_2DROP OP_2DROP <payee>
//! ```

use crate::error::{ChainError, Result};
use crate::types::{ClaimId, CLAIM_ID_LEN};

pub const OP_CLAIM_NAME: u8 = 0xb5;
pub const OP_SUPPORT_CLAIM: u8 = 0xb6;
pub const OP_UPDATE_CLAIM: u8 = 0xb7;

const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_2DROP: u8 = 0x6d;
const OP_DROP: u8 = 0x75;

/// Longest accepted claim name.
pub const MAX_NAME_LEN: usize = 255;

/// Claim operation carried by a script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimOpcode {
    ClaimName,
    SupportClaim,
    UpdateClaim,
}

impl ClaimOpcode {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            OP_CLAIM_NAME => Some(ClaimOpcode::ClaimName),
            OP_SUPPORT_CLAIM => Some(ClaimOpcode::SupportClaim),
            OP_UPDATE_CLAIM => Some(ClaimOpcode::UpdateClaim),
            _ => None,
        }
    }

    fn byte(self) -> u8 {
        match self {
            ClaimOpcode::ClaimName => OP_CLAIM_NAME,
            ClaimOpcode::SupportClaim => OP_SUPPORT_CLAIM,
            ClaimOpcode::UpdateClaim => OP_UPDATE_CLAIM,
        }
    }
}

/// Decoded claim prefix of an output script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimScript {
    pub opcode: ClaimOpcode,
    pub name: Vec<u8>,
    /// Present for supports and updates.
    pub claim_id: Option<ClaimId>,
    /// Claim metadata; empty for supports.
    pub value: Vec<u8>,
}

impl ClaimScript {
    pub fn claim_name(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode: ClaimOpcode::ClaimName,
            name: name.into(),
            claim_id: None,
            value: value.into(),
        }
    }

    pub fn support_claim(name: impl Into<Vec<u8>>, claim_id: ClaimId) -> Self {
        Self {
            opcode: ClaimOpcode::SupportClaim,
            name: name.into(),
            claim_id: Some(claim_id),
            value: Vec::new(),
        }
    }

    pub fn update_claim(
        name: impl Into<Vec<u8>>,
        claim_id: ClaimId,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            opcode: ClaimOpcode::UpdateClaim,
            name: name.into(),
            claim_id: Some(claim_id),
            value: value.into(),
        }
    }

    /// Encode the claim prefix followed by `payee`.
    pub fn to_script(&self, payee: &[u8]) -> Vec<u8> {
        let mut script = vec![self.opcode.byte()];
        push_data(&mut script, &self.name);
        match self.opcode {
            ClaimOpcode::ClaimName => {
                push_data(&mut script, &self.value);
                script.extend_from_slice(&[OP_2DROP, OP_DROP]);
            }
            ClaimOpcode::SupportClaim => {
                push_data(&mut script, &self.claim_id.unwrap_or_default().0);
                script.extend_from_slice(&[OP_2DROP, OP_DROP]);
            }
            ClaimOpcode::UpdateClaim => {
                push_data(&mut script, &self.claim_id.unwrap_or_default().0);
                push_data(&mut script, &self.value);
                script.extend_from_slice(&[OP_2DROP, OP_2DROP]);
            }
        }
        script.extend_from_slice(payee);
        script
    }
}

/// Decode the claim prefix of an output script.
///
/// Returns `Ok(None)` for scripts that are not claim-related at all, and an
/// error for scripts that start with a claim opcode but are malformed.
pub fn decode(script: &[u8]) -> Result<Option<ClaimScript>> {
    let opcode = match script.first().copied().and_then(ClaimOpcode::from_byte) {
        Some(op) => op,
        None => return Ok(None),
    };

    let mut reader = ScriptReader {
        script,
        pos: 1,
    };

    let name = reader.push()?.to_vec();
    if name.len() > MAX_NAME_LEN {
        return Err(ChainError::ScriptDecode(format!(
            "name too long: {} bytes",
            name.len()
        )));
    }

    let decoded = match opcode {
        ClaimOpcode::ClaimName => {
            let value = reader.push()?.to_vec();
            reader.expect_ops(&[OP_2DROP, OP_DROP])?;
            ClaimScript {
                opcode,
                name,
                claim_id: None,
                value,
            }
        }
        ClaimOpcode::SupportClaim => {
            let claim_id = reader.claim_id()?;
            reader.expect_ops(&[OP_2DROP, OP_DROP])?;
            ClaimScript {
                opcode,
                name,
                claim_id: Some(claim_id),
                value: Vec::new(),
            }
        }
        ClaimOpcode::UpdateClaim => {
            let claim_id = reader.claim_id()?;
            let value = reader.push()?.to_vec();
            reader.expect_ops(&[OP_2DROP, OP_2DROP])?;
            ClaimScript {
                opcode,
                name,
                claim_id: Some(claim_id),
                value,
            }
        }
    };

    Ok(Some(decoded))
}

fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len <= 75 {
        script.push(len as u8);
    } else if len <= u8::MAX as usize {
        script.push(OP_PUSHDATA1);
        script.push(len as u8);
    } else if len <= u16::MAX as usize {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        script.push(OP_PUSHDATA4);
        script.extend_from_slice(&(len as u32).to_le_bytes());
    }
    script.extend_from_slice(data);
}

struct ScriptReader<'a> {
    script: &'a [u8],
    pos: usize,
}

impl<'a> ScriptReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.script.len())
            .ok_or_else(|| ChainError::ScriptDecode(format!("truncated at byte {}", self.pos)))?;
        let bytes = &self.script[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn push(&mut self) -> Result<&'a [u8]> {
        let op = self.take(1)?[0];
        let len = match op {
            0..=75 => op as usize,
            OP_PUSHDATA1 => self.take(1)?[0] as usize,
            OP_PUSHDATA2 => {
                let b = self.take(2)?;
                u16::from_le_bytes([b[0], b[1]]) as usize
            }
            OP_PUSHDATA4 => {
                let b = self.take(4)?;
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
            }
            other => {
                return Err(ChainError::ScriptDecode(format!(
                    "expected data push, found opcode 0x{:02x}",
                    other
                )))
            }
        };
        self.take(len)
    }

    fn claim_id(&mut self) -> Result<ClaimId> {
        let bytes = self.push()?;
        let id = ClaimId::from_slice(bytes).ok_or_else(|| {
            ChainError::ScriptDecode(format!(
                "claim id must be {} bytes, got {}",
                CLAIM_ID_LEN,
                bytes.len()
            ))
        })?;
        if id.is_zero() {
            return Err(ChainError::ScriptDecode("zero claim id".into()));
        }
        Ok(id)
    }

    fn expect_ops(&mut self, ops: &[u8]) -> Result<()> {
        let found = self.take(ops.len())?;
        if found != ops {
            return Err(ChainError::ScriptDecode(format!(
                "expected drop opcodes {:02x?}, found {:02x?}",
                ops, found
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYEE: &[u8] = &[0x76, 0xa9, 0x14];

    fn some_id() -> ClaimId {
        ClaimId([9u8; CLAIM_ID_LEN])
    }

    #[test]
    fn test_plain_script_is_not_claim() {
        assert_eq!(decode(PAYEE).unwrap(), None);
        assert_eq!(decode(&[]).unwrap(), None);
    }

    #[test]
    fn test_decode_each_form() {
        let claim = ClaimScript::claim_name("alice", b"meta".to_vec());
        assert_eq!(decode(&claim.to_script(PAYEE)).unwrap(), Some(claim));

        let support = ClaimScript::support_claim("alice", some_id());
        assert_eq!(decode(&support.to_script(PAYEE)).unwrap(), Some(support));

        let update = ClaimScript::update_claim("alice", some_id(), b"v2".to_vec());
        assert_eq!(decode(&update.to_script(PAYEE)).unwrap(), Some(update));
    }

    #[test]
    fn test_long_value_uses_pushdata() {
        let claim = ClaimScript::claim_name("big", vec![1u8; 600]);
        let script = claim.to_script(&[]);
        assert_eq!(script[5], OP_PUSHDATA2);
        assert_eq!(decode(&script).unwrap(), Some(claim));
    }

    #[test]
    fn test_truncated_claim_is_error() {
        let script = ClaimScript::claim_name("alice", b"meta".to_vec()).to_script(&[]);
        let result = decode(&script[..script.len() - 3]);
        assert!(matches!(result, Err(ChainError::ScriptDecode(_))));
    }

    #[test]
    fn test_wrong_claim_id_width_is_error() {
        let mut script = vec![OP_SUPPORT_CLAIM];
        push_data(&mut script, b"alice");
        push_data(&mut script, &[1u8; 19]);
        script.extend_from_slice(&[OP_2DROP, OP_DROP]);

        assert!(matches!(decode(&script), Err(ChainError::ScriptDecode(_))));
    }

    #[test]
    fn test_missing_drops_is_error() {
        let mut script = vec![OP_CLAIM_NAME];
        push_data(&mut script, b"alice");
        push_data(&mut script, b"meta");
        script.push(OP_DROP);
        script.push(OP_DROP);

        assert!(matches!(decode(&script), Err(ChainError::ScriptDecode(_))));
    }
}
