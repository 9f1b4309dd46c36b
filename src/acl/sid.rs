use std::fmt;
use std::str::FromStr;

use crate::common::error::{FsError, FsResult};

const SID_REVISION: u8 = 1;
const MAX_SUB_AUTHORITIES: usize = 15;

/// A Windows security identifier in its parsed form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid {
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    pub fn new(authority: u64, sub_authorities: &[u32]) -> Self {
        Self {
            authority,
            sub_authorities: sub_authorities.to_vec(),
        }
    }

    pub fn everyone() -> Self {
        Self::new(1, &[0])
    }

    pub fn creator_owner() -> Self {
        Self::new(3, &[0])
    }

    pub fn creator_group() -> Self {
        Self::new(3, &[1])
    }

    pub fn authenticated_users() -> Self {
        Self::new(5, &[11])
    }

    pub fn local_system() -> Self {
        Self::new(5, &[18])
    }

    pub fn builtin_administrators() -> Self {
        Self::new(5, &[32, 544])
    }

    pub fn builtin_users() -> Self {
        Self::new(5, &[32, 545])
    }

    pub fn authority(&self) -> u64 {
        self.authority
    }

    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }

    /// Account name for SIDs every Windows machine knows.
    pub fn well_known_name(&self) -> Option<&'static str> {
        let name = match (self.authority, self.sub_authorities.as_slice()) {
            (1, [0]) => "Everyone",
            (3, [0]) => "CREATOR OWNER",
            (3, [1]) => "CREATOR GROUP",
            (5, [11]) => "NT AUTHORITY\\Authenticated Users",
            (5, [18]) => "NT AUTHORITY\\SYSTEM",
            (5, [32, 544]) => "BUILTIN\\Administrators",
            (5, [32, 545]) => "BUILTIN\\Users",
            _ => return None,
        };
        Some(name)
    }

    pub fn encoded_len(&self) -> usize {
        8 + 4 * self.sub_authorities.len()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(SID_REVISION);
        out.push(self.sub_authorities.len() as u8);
        out.extend_from_slice(&self.authority.to_be_bytes()[2..]);
        for sub in &self.sub_authorities {
            out.extend_from_slice(&sub.to_le_bytes());
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Decodes a binary SID from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> FsResult<Self> {
        if bytes.len() < 8 {
            return Err(FsError::invalid_descriptor("SID is truncated"));
        }
        if bytes[0] != SID_REVISION {
            return Err(FsError::invalid_descriptor(format!(
                "unsupported SID revision {}",
                bytes[0]
            )));
        }
        let count = bytes[1] as usize;
        if count > MAX_SUB_AUTHORITIES || bytes.len() < 8 + 4 * count {
            return Err(FsError::invalid_descriptor("SID is truncated"));
        }
        let mut authority = [0u8; 8];
        authority[2..].copy_from_slice(&bytes[2..8]);
        let sub_authorities = bytes[8..8 + 4 * count]
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Self {
            authority: u64::from_be_bytes(authority),
            sub_authorities,
        })
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-", SID_REVISION)?;
        if self.authority >= 1 << 32 {
            write!(f, "0x{:012X}", self.authority)?;
        } else {
            write!(f, "{}", self.authority)?;
        }
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

impl FromStr for Sid {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || FsError::invalid_descriptor(format!("`{s}` is not a SID string"));
        let mut parts = s.split('-');
        if !parts.next().is_some_and(|p| p.eq_ignore_ascii_case("S")) {
            return Err(bad());
        }
        if parts.next() != Some("1") {
            return Err(bad());
        }
        let authority = parts.next().ok_or_else(bad)?;
        let authority = match authority.strip_prefix("0x").or_else(|| authority.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).map_err(|_| bad())?,
            None => authority.parse::<u64>().map_err(|_| bad())?,
        };
        if authority >= 1 << 48 {
            return Err(bad());
        }
        let sub_authorities = parts
            .map(|p| p.parse::<u32>().map_err(|_| bad()))
            .collect::<FsResult<Vec<u32>>>()?;
        if sub_authorities.len() > MAX_SUB_AUTHORITIES {
            return Err(bad());
        }
        Ok(Self {
            authority,
            sub_authorities,
        })
    }
}
