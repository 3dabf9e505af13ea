//! Pre-synthesis text normalization: links and emojis are not worth speaking.

use std::sync::LazyLock;

use regex::Regex;

static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:https?://|ftp://|www\.)[^\s<>]+").expect("link pattern is valid")
});

/// Remove URLs, keeping the surrounding text intact
pub fn remove_links(text: &str) -> String {
    LINK.replace_all(text, "").into_owned()
}

/// Remove pictographic characters and the joiners/selectors that glue them
pub fn remove_emojis(text: &str) -> String {
    text.chars().filter(|&c| !is_emoji(c)).collect()
}

pub fn is_emoji(c: char) -> bool {
    matches!(c as u32,
        0x1F000..=0x1FAFF   // mahjong, cards, emoticons, symbols, transport, supplemental
        | 0x2600..=0x27BF   // misc symbols and dingbats
        | 0x2B00..=0x2BFF   // arrows, stars
        | 0x1F1E6..=0x1F1FF // regional indicators
        | 0xFE0F            // variation selector-16
        | 0x200D            // zero width joiner
        | 0x20E3            // combining keycap
        | 0xE0020..=0xE007F // tag sequences
    )
}

/// Apply the enabled cleanups and collapse the whitespace they leave behind
pub fn clean_text(text: &str, links: bool, emojis: bool) -> String {
    if !links && !emojis {
        return text.to_string();
    }
    let mut out = if links {
        remove_links(text)
    } else {
        text.to_string()
    };
    if emojis {
        out = remove_emojis(&out);
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
