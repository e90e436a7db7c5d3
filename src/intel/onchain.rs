//! On-chain mint inspection
//!
//! Reads the mint account and derives what the chain itself guarantees:
//! which token program owns it, whether mint/freeze authorities are still
//! live, and for Token-2022 mints the transfer fee and risky extensions.

use serde::{Deserialize, Serialize};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use spl_token::solana_program::program_option::COption;
use spl_token::solana_program::program_pack::Pack;
use spl_token::state::Mint;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};

pub const SPL_TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

/// Offset of the account-type byte in a Token-2022 mint with extensions
const ACCOUNT_TYPE_OFFSET: usize = 165;
/// Account-type value for mints
const ACCOUNT_TYPE_MINT: u8 = 1;
/// First TLV entry
const EXTENSIONS_OFFSET: usize = ACCOUNT_TYPE_OFFSET + 1;

// Token-2022 extension type ids
const EXT_TRANSFER_FEE_CONFIG: u16 = 1;
const EXT_DEFAULT_ACCOUNT_STATE: u16 = 6;
const EXT_NON_TRANSFERABLE: u16 = 9;
const EXT_PERMANENT_DELEGATE: u16 = 12;
const EXT_TRANSFER_HOOK: u16 = 14;
const EXT_PAUSABLE: u16 = 26;

/// Offset of the newer fee's basis points inside TransferFeeConfig:
/// two authorities, withheld amount, older fee (epoch, max, bps), newer epoch and max
const NEWER_FEE_BPS_OFFSET: usize = 32 + 32 + 8 + 18 + 8 + 8;

/// DefaultAccountState value for frozen
const ACCOUNT_STATE_FROZEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenProgram {
    Spl,
    Token2022,
}

impl TokenProgram {
    pub fn from_owner(owner: &str) -> Option<Self> {
        match owner {
            SPL_TOKEN_PROGRAM_ID => Some(TokenProgram::Spl),
            TOKEN_2022_PROGRAM_ID => Some(TokenProgram::Token2022),
            _ => None,
        }
    }
}

impl std::fmt::Display for TokenProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenProgram::Spl => write!(f, "spl-token"),
            TokenProgram::Token2022 => write!(f, "token-2022"),
        }
    }
}

/// What the mint account says about a token at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintSnapshot {
    pub program: TokenProgram,
    pub decimals: u8,
    pub mint_authority: Option<String>,
    pub freeze_authority: Option<String>,
    /// Transfer fee in basis points; always 0 for SPL mints
    pub transfer_fee_bps: u16,
    /// Extensions that can block or claw back transfers
    pub dangerous_extensions: Vec<String>,
}

impl MintSnapshot {
    pub fn authorities_revoked(&self) -> bool {
        self.mint_authority.is_none() && self.freeze_authority.is_none()
    }

    /// Transfer tax in percent, charged on both buys and sells
    pub fn transfer_tax_pct(&self) -> f64 {
        self.transfer_fee_bps as f64 / 100.0
    }
}

fn coption_to_string(value: COption<spl_token::solana_program::pubkey::Pubkey>) -> Option<String> {
    match value {
        COption::Some(key) => Some(key.to_string()),
        COption::None => None,
    }
}

/// Parse a mint account owned by `owner`
pub fn parse_mint(owner: &str, data: &[u8]) -> Result<MintSnapshot> {
    let program = TokenProgram::from_owner(owner)
        .ok_or_else(|| Error::SecurityRejection(format!("mint owned by unknown program {}", owner)))?;

    if data.len() < Mint::LEN {
        return Err(Error::Deserialization(format!(
            "mint account too short: {} bytes",
            data.len()
        )));
    }
    let base = Mint::unpack(&data[..Mint::LEN])
        .map_err(|e| Error::Deserialization(format!("mint unpack failed: {}", e)))?;

    let mut snapshot = MintSnapshot {
        program,
        decimals: base.decimals,
        mint_authority: coption_to_string(base.mint_authority),
        freeze_authority: coption_to_string(base.freeze_authority),
        transfer_fee_bps: 0,
        dangerous_extensions: Vec::new(),
    };

    if program == TokenProgram::Token2022 {
        scan_extensions(data, &mut snapshot);
    }

    Ok(snapshot)
}

/// Walk the Token-2022 TLV area after the base mint
fn scan_extensions(data: &[u8], snapshot: &mut MintSnapshot) {
    if data.len() <= ACCOUNT_TYPE_OFFSET || data[ACCOUNT_TYPE_OFFSET] != ACCOUNT_TYPE_MINT {
        return;
    }

    let mut offset = EXTENSIONS_OFFSET;
    while offset + 4 <= data.len() {
        let ext_type = u16::from_le_bytes([data[offset], data[offset + 1]]);
        let len = u16::from_le_bytes([data[offset + 2], data[offset + 3]]) as usize;
        let start = offset + 4;
        if ext_type == 0 || start + len > data.len() {
            break;
        }
        let value = &data[start..start + len];

        match ext_type {
            EXT_TRANSFER_FEE_CONFIG if value.len() >= NEWER_FEE_BPS_OFFSET + 2 => {
                snapshot.transfer_fee_bps = u16::from_le_bytes([
                    value[NEWER_FEE_BPS_OFFSET],
                    value[NEWER_FEE_BPS_OFFSET + 1],
                ]);
            }
            EXT_NON_TRANSFERABLE => snapshot.dangerous_extensions.push("NonTransferable".into()),
            EXT_PERMANENT_DELEGATE => {
                // An all-zero delegate is unset
                if value.iter().any(|b| *b != 0) {
                    snapshot.dangerous_extensions.push("PermanentDelegate".into());
                }
            }
            EXT_TRANSFER_HOOK => {
                // authority (32) + program id (32)
                if value.len() >= 64 && value[32..64].iter().any(|b| *b != 0) {
                    snapshot.dangerous_extensions.push("TransferHook".into());
                }
            }
            EXT_DEFAULT_ACCOUNT_STATE => {
                if value.first() == Some(&ACCOUNT_STATE_FROZEN) {
                    snapshot.dangerous_extensions.push("DefaultAccountStateFrozen".into());
                }
            }
            EXT_PAUSABLE => snapshot.dangerous_extensions.push("Pausable".into()),
            _ => {}
        }

        offset = start + len;
    }
}

/// RPC-backed mint reader
pub struct MintInspector {
    rpc: Arc<RpcClient>,
}

impl MintInspector {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }

    pub async fn inspect(&self, mint: &str) -> Result<MintSnapshot> {
        let pubkey = Pubkey::from_str(mint)
            .map_err(|e| Error::SecurityRejection(format!("invalid mint {}: {}", mint, e)))?;
        let account = self.rpc.get_account(&pubkey).await?;
        let snapshot = parse_mint(&account.owner.to_string(), &account.data)?;
        debug!(
            mint = %mint,
            program = %snapshot.program,
            revoked = snapshot.authorities_revoked(),
            fee_bps = snapshot.transfer_fee_bps,
            "Mint inspected"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_mint(mint_authority: Option<[u8; 32]>, freeze_authority: Option<[u8; 32]>) -> Vec<u8> {
        let mut data = vec![0u8; Mint::LEN];
        if let Some(key) = mint_authority {
            data[0..4].copy_from_slice(&1u32.to_le_bytes());
            data[4..36].copy_from_slice(&key);
        }
        data[36..44].copy_from_slice(&1_000_000_000u64.to_le_bytes());
        data[44] = 6;
        data[45] = 1;
        if let Some(key) = freeze_authority {
            data[46..50].copy_from_slice(&1u32.to_le_bytes());
            data[50..82].copy_from_slice(&key);
        }
        data
    }

    fn with_extensions(mut data: Vec<u8>, entries: &[(u16, Vec<u8>)]) -> Vec<u8> {
        data.resize(ACCOUNT_TYPE_OFFSET, 0);
        data.push(ACCOUNT_TYPE_MINT);
        for (ext_type, value) in entries {
            data.extend_from_slice(&ext_type.to_le_bytes());
            data.extend_from_slice(&(value.len() as u16).to_le_bytes());
            data.extend_from_slice(value);
        }
        data
    }

    #[test]
    fn test_spl_mint_revoked() {
        let data = base_mint(None, None);
        let snapshot = parse_mint(SPL_TOKEN_PROGRAM_ID, &data).unwrap();
        assert_eq!(snapshot.program, TokenProgram::Spl);
        assert_eq!(snapshot.decimals, 6);
        assert!(snapshot.authorities_revoked());
        assert_eq!(snapshot.transfer_tax_pct(), 0.0);
    }

    #[test]
    fn test_live_authorities_detected() {
        let data = base_mint(Some([7u8; 32]), Some([9u8; 32]));
        let snapshot = parse_mint(SPL_TOKEN_PROGRAM_ID, &data).unwrap();
        assert!(snapshot.mint_authority.is_some());
        assert!(snapshot.freeze_authority.is_some());
        assert!(!snapshot.authorities_revoked());
    }

    #[test]
    fn test_unknown_owner_rejected() {
        let data = base_mint(None, None);
        let err = parse_mint("11111111111111111111111111111111", &data).unwrap_err();
        assert!(err.is_rejection());
    }

    #[test]
    fn test_short_account_rejected() {
        assert!(parse_mint(SPL_TOKEN_PROGRAM_ID, &[0u8; 40]).is_err());
    }

    #[test]
    fn test_token2022_transfer_fee() {
        let mut fee = vec![0u8; NEWER_FEE_BPS_OFFSET + 2];
        fee[NEWER_FEE_BPS_OFFSET..].copy_from_slice(&500u16.to_le_bytes());
        let data = with_extensions(base_mint(None, None), &[(EXT_TRANSFER_FEE_CONFIG, fee)]);
        let snapshot = parse_mint(TOKEN_2022_PROGRAM_ID, &data).unwrap();
        assert_eq!(snapshot.program, TokenProgram::Token2022);
        assert_eq!(snapshot.transfer_fee_bps, 500);
        assert!((snapshot.transfer_tax_pct() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_token2022_dangerous_extensions() {
        let data = with_extensions(
            base_mint(None, None),
            &[
                (EXT_PERMANENT_DELEGATE, vec![3u8; 32]),
                (EXT_NON_TRANSFERABLE, Vec::new()),
                (EXT_DEFAULT_ACCOUNT_STATE, vec![ACCOUNT_STATE_FROZEN]),
            ],
        );
        let snapshot = parse_mint(TOKEN_2022_PROGRAM_ID, &data).unwrap();
        assert_eq!(
            snapshot.dangerous_extensions,
            vec!["PermanentDelegate", "NonTransferable", "DefaultAccountStateFrozen"]
        );
    }

    #[test]
    fn test_unset_delegate_ignored() {
        let data = with_extensions(base_mint(None, None), &[(EXT_PERMANENT_DELEGATE, vec![0u8; 32])]);
        let snapshot = parse_mint(TOKEN_2022_PROGRAM_ID, &data).unwrap();
        assert!(snapshot.dangerous_extensions.is_empty());
    }
}
