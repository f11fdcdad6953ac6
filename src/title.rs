use scraper::{Html, Selector};

const TITLE_MAX_CHARS: usize = 100;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleStrategy {
    /// Lowercase byte scan for the `<title>` markers. Cheap, but trusts the
    /// markup to be sane.
    Fast,
    /// Full HTML tokenizer pass. Costs more CPU but is not fooled by
    /// comments or title markers inside scripts.
    Robust,
}

impl TitleStrategy {
    pub fn label(self) -> &'static str {
        match self {
            TitleStrategy::Fast => "fast",
            TitleStrategy::Robust => "robust",
        }
    }
}

/// Pulls a display title out of a bounded body prefix. Malformed or absent
/// markup yields an empty string, never an error.
pub fn extract_title(body: &[u8], strategy: TitleStrategy) -> String {
    if body.is_empty() {
        return String::new();
    }
    let html = String::from_utf8_lossy(body);
    match strategy {
        TitleStrategy::Fast => fast_title(&html),
        TitleStrategy::Robust => robust_title(&html),
    }
}

fn fast_title(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let Some(open_at) = lower.find("<title") else {
        return String::new();
    };
    // Skip past any attributes on the opening tag.
    let Some(gt_rel) = lower[open_at..].find('>') else {
        return String::new();
    };
    let text_start = open_at + gt_rel + 1;
    let Some(close_rel) = lower[text_start..].find("</title") else {
        return String::new();
    };
    clean_title(&html[text_start..text_start + close_rel])
}

fn robust_title(html: &str) -> String {
    let doc = Html::parse_document(html);
    let selector = match Selector::parse("title") {
        Ok(s) => s,
        Err(_) => return String::new(),
    };

    doc.select(&selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .map(|text| clean_title(&text))
        .unwrap_or_default()
}

fn clean_title(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return collapsed;
    }
    collapsed.chars().take(TITLE_MAX_CHARS).collect::<String>() + ELLIPSIS
}
