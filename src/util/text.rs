/// テキスト処理ユーティリティ。
use once_cell::sync::Lazy;
use regex::Regex;

static HTML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]+>").expect("html tag pattern is valid"));

/// フィード要約に含まれるHTMLタグを取り除き、空白を畳み込む。
#[must_use]
pub(crate) fn strip_html(text: &str) -> String {
    let stripped = HTML_TAG.replace_all(text, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 表示上の長さ（バイトではなく文字数）。
#[must_use]
pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}
