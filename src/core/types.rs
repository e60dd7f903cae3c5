// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Identifier types shared across the crate

use once_cell::sync::Lazy;
use regex::Regex;

use super::error::{KbError, Result};

/// Store-assigned surrogate key of a stored vector
pub type PrimaryKey = i64;

/// Knowledge-base identifier as handed out by the surrounding application
pub type KnowledgeBaseId = String;

static COLLECTION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

/// Deterministic collection name for a knowledge base.
///
/// Dashes are not valid in collection names, so `kb-1f2e` under prefix
/// `colqwen` becomes `colqwenkb_1f2e`.
pub fn collection_name_for(prefix: &str, kb_id: &str) -> Result<String> {
    let name = format!("{}{}", prefix, kb_id.replace('-', "_"));
    validate_collection_name(&name)?;
    Ok(name)
}

pub fn validate_collection_name(name: &str) -> Result<()> {
    if COLLECTION_NAME.is_match(name) {
        Ok(())
    } else {
        Err(KbError::InvalidInput(format!("invalid collection name: '{name}'")))
    }
}
