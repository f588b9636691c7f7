use rustc_hash::FxHashMap;

use crate::rail_core::types::TokenId;

#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub name: String,
    pub id: TokenId,
    /// Internal storage scale (smallest unit exponent).
    pub decimals: u32,
    /// Max decimal places accepted/shown at the client edge.
    pub display_decimals: u32,
}

/// Manages token-name-to-id and id-to-token-name mappings.
pub struct TokenRegistry {
    pub name_to_id: FxHashMap<String, TokenId>,
    pub id_to_name: FxHashMap<TokenId, String>,
    pub token_info: FxHashMap<TokenId, TokenInfo>,
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenRegistry {
    pub fn new() -> Self {
        TokenRegistry {
            name_to_id: FxHashMap::default(),
            id_to_name: FxHashMap::default(),
            token_info: FxHashMap::default(),
        }
    }

    pub fn insert(&mut self, name: &str, id: TokenId) {
        self.insert_with_decimals(name, id, 18, 6); // Default: 18 stored, 6 displayed
    }

    pub fn insert_with_decimals(
        &mut self,
        name: &str,
        id: TokenId,
        decimals: u32,
        display_decimals: u32,
    ) {
        self.name_to_id.insert(name.to_string(), id);
        self.id_to_name.insert(id, name.to_string());
        self.token_info.insert(
            id,
            TokenInfo { name: name.to_string(), id, decimals, display_decimals },
        );
    }

    pub fn get_id(&self, name: &str) -> Option<TokenId> {
        self.name_to_id.get(name).copied()
    }

    pub fn get_name(&self, id: TokenId) -> Option<&String> {
        self.id_to_name.get(&id)
    }

    pub fn get_info(&self, name: &str) -> Option<&TokenInfo> {
        let id = self.get_id(name)?;
        self.token_info.get(&id)
    }

    pub fn get_info_by_id(&self, id: TokenId) -> Option<&TokenInfo> {
        self.token_info.get(&id)
    }

    /// Seed a registry with the tokens of the reference deployment.
    pub fn seeded() -> Self {
        let mut registry = TokenRegistry::new();
        // FIL: 18 stored decimals, clients enter up to 6
        registry.insert_with_decimals("FIL", 0, 18, 6);
        // USDFC: 6 stored decimals, clients enter up to 2
        registry.insert_with_decimals("USDFC", 1, 6, 2);
        registry
    }
}
