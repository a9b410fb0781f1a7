use crate::error::{AppError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Character vocabulary for the CTC acoustic model
pub struct Vocabulary {
    tokens: Vec<String>,
    token_to_id: HashMap<String, usize>,
    // Special token IDs
    pub blank_id: usize,
    pub unk_id: usize,
    /// Word boundary marker ("|")
    pub word_delim_id: usize,
}

impl Vocabulary {
    /// Load vocabulary from JSON format (vocab.json)
    /// Format: {"token_text": token_id, ...} (wav2vec2 processor dump)
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(AppError::Io)?;

        let json: HashMap<String, usize> = serde_json::from_str(&content)
            .map_err(|e| AppError::Inference(format!("Failed to parse vocab JSON: {}", e)))?;

        let max_id = json.values().copied().max().unwrap_or(0);

        let mut tokens = vec![String::new(); max_id + 1];
        let mut token_to_id = HashMap::new();

        for (token, id) in json {
            tokens[id] = token.clone();
            token_to_id.insert(token, id);
        }

        Self::finish(tokens, token_to_id)
    }

    /// Load vocabulary from TXT format (vocab.txt)
    /// Format: "token index\n" (e.g., "<pad> 0\n| 4\n")
    pub fn load_txt(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(AppError::Io)?;

        let mut tokens = Vec::new();
        let mut token_to_id = HashMap::new();

        for line in content.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            // Split from the right so tokens containing spaces survive
            if let Some(last_space) = line.rfind(' ') {
                let token = &line[..last_space];
                let id_str = &line[last_space + 1..];

                if let Ok(id) = id_str.parse::<usize>() {
                    if id >= tokens.len() {
                        tokens.resize(id + 1, String::new());
                    }
                    tokens[id] = token.to_string();
                    token_to_id.insert(token.to_string(), id);
                }
            }
        }

        Self::finish(tokens, token_to_id)
    }

    /// Load vocabulary, auto-detecting format from extension
    pub fn load(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::load_json(path),
            Some("txt") => Self::load_txt(path),
            _ => Err(AppError::Inference(format!(
                "Unknown vocabulary format: {:?}",
                path
            ))),
        }
    }

    fn finish(tokens: Vec<String>, token_to_id: HashMap<String, usize>) -> Result<Self> {
        if tokens.is_empty() {
            return Err(AppError::Inference("empty vocabulary".to_string()));
        }

        // CTC blank is the padding token in wav2vec2-style vocabularies
        let blank_id = ["<pad>", "[PAD]", "<blk>"]
            .iter()
            .find_map(|t| token_to_id.get(*t).copied())
            .unwrap_or(0);
        let unk_id = ["<unk>", "[UNK]"]
            .iter()
            .find_map(|t| token_to_id.get(*t).copied())
            .unwrap_or(blank_id);
        let word_delim_id = token_to_id.get("|").copied().ok_or_else(|| {
            AppError::Inference("vocabulary has no '|' word boundary token".to_string())
        })?;

        Ok(Self {
            tokens,
            token_to_id,
            blank_id,
            unk_id,
            word_delim_id,
        })
    }

    pub fn decode_token(&self, id: usize) -> &str {
        self.tokens.get(id).map(|s| s.as_str()).unwrap_or("<unk>")
    }

    pub fn vocab_size(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_special_token(&self, id: usize) -> bool {
        id == self.blank_id || id == self.unk_id
    }

    /// Character-level tokenization of normalized text. Spaces map to
    /// the word-boundary token; characters outside the vocabulary are
    /// dropped.
    pub fn tokenize(&self, text: &str) -> Vec<usize> {
        let mut ids = Vec::new();
        for c in text.chars() {
            if c.is_whitespace() {
                if ids.last() != Some(&self.word_delim_id) {
                    ids.push(self.word_delim_id);
                }
                continue;
            }
            if let Some(&id) = self.token_to_id.get(c.to_string().as_str()) {
                if !self.is_special_token(id) {
                    ids.push(id);
                }
            }
        }
        // No dangling boundary at either edge
        while ids.first() == Some(&self.word_delim_id) {
            ids.remove(0);
        }
        while ids.last() == Some(&self.word_delim_id) {
            ids.pop();
        }
        ids
    }
}
