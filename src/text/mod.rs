pub mod normalize;
pub mod similarity;

pub use normalize::{is_basmalah, normalize_arabic, word_count, BASMALAH, CLOSING_FORMULA};
pub use similarity::{longest_common_substring, similarity_ratio, word_similarity};
