//! BERT-style WordPiece tokenizer for the conversational checkpoint

use crate::sampling::SpecialTokens;
use modelhost_core::{Error, Result};
use std::path::Path;
use tokenizers::decoders::wordpiece::WordPiece as WordPieceDecoder;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::{AddedToken, Tokenizer};

/// BERT control tokens never rendered in a reply
const HIDDEN_TOKENS: [&str; 5] = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]"];

/// Tokenizer plus the ids of the conversation control tokens
pub struct ChatTokenizer {
    tokenizer: Tokenizer,
    special: SpecialTokens,
    hidden: Vec<u32>,
}

impl ChatTokenizer {
    /// Load from a checkpoint directory (`tokenizer.json` or `vocab.txt`)
    pub fn from_dir(dir: &Path) -> Result<Self> {
        Self::new(load_tokenizer(dir)?)
    }

    /// Wrap a tokenizer, resolving the ids of the control tokens
    pub fn new(mut tokenizer: Tokenizer) -> Result<Self> {
        let added: Vec<AddedToken> = SpecialTokens::NAMES
            .iter()
            .map(|name| AddedToken::from(name.to_string(), true))
            .collect();
        tokenizer.add_special_tokens(&added);

        let id = |name: &str| {
            tokenizer.token_to_id(name).ok_or_else(|| {
                Error::plugin(format!("special token {} missing from vocabulary", name))
            })
        };
        let [bos, eos, pad, speaker1, speaker2] = SpecialTokens::NAMES;
        let special = SpecialTokens {
            bos: id(bos)?,
            eos: id(eos)?,
            pad: id(pad)?,
            speaker1: id(speaker1)?,
            speaker2: id(speaker2)?,
        };

        // [UNK] and [MASK] are hidden on decode but never stop generation
        let hidden = HIDDEN_TOKENS
            .iter()
            .filter_map(|name| tokenizer.token_to_id(name))
            .collect();

        Ok(Self {
            tokenizer,
            special,
            hidden,
        })
    }

    pub fn special_tokens(&self) -> SpecialTokens {
        self.special
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    /// Token ids of `text`, without [CLS]/[SEP] framing
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| Error::model(format!("Tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Text of `ids` with control tokens skipped and all spaces removed
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        let visible: Vec<u32> = ids
            .iter()
            .copied()
            .filter(|id| !self.hidden.contains(id))
            .collect();
        let text = self
            .tokenizer
            .decode(&visible, true)
            .map_err(|e| Error::model(format!("Decoding failed: {}", e)))?;
        Ok(text.replace(' ', ""))
    }
}

/// Build the tokenizer of a checkpoint directory
pub fn load_tokenizer(model_path: &Path) -> Result<Tokenizer> {
    let tokenizer_json_path = model_path.join("tokenizer.json");
    if tokenizer_json_path.exists() {
        tracing::debug!("Loading tokenizer from tokenizer.json");
        return Tokenizer::from_file(&tokenizer_json_path)
            .map_err(|e| Error::model(format!("Failed to load tokenizer.json: {}", e)));
    }

    let vocab_path = model_path.join("vocab.txt");
    if vocab_path.exists() {
        tracing::debug!("Building tokenizer from vocab.txt");

        let wordpiece = WordPiece::from_file(vocab_path.to_string_lossy().as_ref())
            .unk_token("[UNK]".to_string())
            .build()
            .map_err(|e| Error::model(format!("Failed to build WordPiece model: {}", e)))?;

        let mut tokenizer = Tokenizer::new(wordpiece);
        tokenizer.with_normalizer(Some(BertNormalizer::default()));
        tokenizer.with_pre_tokenizer(Some(BertPreTokenizer));
        tokenizer.with_decoder(Some(WordPieceDecoder::default()));

        return Ok(tokenizer);
    }

    Err(Error::model(format!(
        "No tokenizer found in {:?} (tried tokenizer.json, vocab.txt)",
        model_path
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOCAB: &str = "[PAD]\n[UNK]\n[CLS]\n[SEP]\n[speaker1]\n[speaker2]\n你\n好\n吗\nhello\n##lo\nhel\n";

    fn tokenizer() -> (tempfile::TempDir, ChatTokenizer) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vocab.txt"), VOCAB).unwrap();
        let tokenizer = ChatTokenizer::from_dir(dir.path()).unwrap();
        (dir, tokenizer)
    }

    #[test]
    fn test_special_token_ids() {
        let (_dir, tokenizer) = tokenizer();
        let special = tokenizer.special_tokens();
        assert_eq!(special.pad, 0);
        assert_eq!(special.bos, 2);
        assert_eq!(special.eos, 3);
        assert_eq!(special.speaker1, 4);
        assert_eq!(special.speaker2, 5);
    }

    #[test]
    fn test_chinese_round_trip_drops_spaces() {
        let (_dir, tokenizer) = tokenizer();
        let ids = tokenizer.encode("你好吗").unwrap();
        assert_eq!(ids, vec![6, 7, 8]);
        assert_eq!(tokenizer.decode(&ids).unwrap(), "你好吗");
    }

    #[test]
    fn test_decode_skips_control_tokens() {
        let (_dir, tokenizer) = tokenizer();
        assert_eq!(tokenizer.decode(&[2, 6, 3, 7]).unwrap(), "你好");
        assert_eq!(tokenizer.decode(&[]).unwrap(), "");
    }

    #[test]
    fn test_decode_merges_wordpiece_continuations() {
        let (_dir, tokenizer) = tokenizer();
        assert_eq!(tokenizer.encode("Hello 你好").unwrap(), vec![9, 6, 7]);
        assert_eq!(tokenizer.decode(&[9, 6, 7]).unwrap(), "hello你好");
        assert_eq!(tokenizer.decode(&[11, 10, 6]).unwrap(), "hello你");
    }

    #[test]
    fn test_decode_hides_unknown_and_mask() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("vocab.txt"),
            "[PAD]\n[UNK]\n[CLS]\n[SEP]\n[MASK]\n[speaker1]\n[speaker2]\n你\n好\n",
        )
        .unwrap();
        let tokenizer = ChatTokenizer::from_dir(dir.path()).unwrap();
        assert_eq!(tokenizer.decode(&[7, 1, 4, 8]).unwrap(), "你好");

        // Only the conversation tokens end a reply
        let special = tokenizer.special_tokens();
        assert!(!special.contains(1));
        assert!(!special.contains(4));
    }

    #[test]
    fn test_missing_vocabulary() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ChatTokenizer::from_dir(dir.path()).is_err());
    }

    #[test]
    fn test_vocabulary_without_speakers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vocab.txt"), "[PAD]\n[UNK]\n[CLS]\n[SEP]\n你\n").unwrap();
        let tokenizer = load_tokenizer(dir.path()).unwrap();
        // Added specials get fresh ids past the vocabulary
        let chat = ChatTokenizer::new(tokenizer).unwrap();
        assert!(chat.special_tokens().speaker1 >= 5);
    }
}
