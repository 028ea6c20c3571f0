//! Destination normalization: raw phone input to a channel chat id.

/// Suffix the channel expects on a personal chat id.
pub const CHAT_ID_SUFFIX: &str = "@c.us";

/// Country code prepended to bare 10-digit numbers.
pub const DEFAULT_COUNTRY_CODE: &str = "91";

const LOCAL_NUMBER_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct PhoneNormalizer {
    country_code: String,
}

impl PhoneNormalizer {
    pub fn new(country_code: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
        }
    }

    /// Strip everything but ASCII digits, prefix the country code when exactly
    /// ten digits remain, then append [`CHAT_ID_SUFFIX`].
    ///
    /// Other lengths pass through as-is: there is no plausibility check, and
    /// feeding an already-normalized id back in is not supported.
    pub fn normalize(&self, raw: &str) -> String {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.len() == LOCAL_NUMBER_LEN {
            format!("{}{digits}{CHAT_ID_SUFFIX}", self.country_code)
        } else {
            format!("{digits}{CHAT_ID_SUFFIX}")
        }
    }
}

impl Default for PhoneNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTRY_CODE)
    }
}
