//! Formatting utilities (message entities → Telegram HTML).

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Formatting span of a message, with UTF-16 offsets as Telegram reports them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextEntity {
    pub offset: usize,
    pub length: usize,
    pub kind: EntityKind,
}

impl TextEntity {
    pub fn new(offset: usize, length: usize, kind: EntityKind) -> Self {
        Self {
            offset,
            length,
            kind,
        }
    }

    fn end(&self) -> usize {
        self.offset + self.length
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Spoiler,
    Code,
    Pre { language: Option<String> },
    TextUrl { url: String },
    Blockquote,
}

impl EntityKind {
    fn open_tag(&self) -> String {
        match self {
            EntityKind::Bold => "<b>".to_string(),
            EntityKind::Italic => "<i>".to_string(),
            EntityKind::Underline => "<u>".to_string(),
            EntityKind::Strikethrough => "<s>".to_string(),
            EntityKind::Spoiler => "<tg-spoiler>".to_string(),
            EntityKind::Code => "<code>".to_string(),
            EntityKind::Pre { language: None } => "<pre>".to_string(),
            EntityKind::Pre {
                language: Some(lang),
            } => format!("<pre><code class=\"language-{}\">", escape_html(lang)),
            EntityKind::TextUrl { url } => format!("<a href=\"{}\">", escape_html(url)),
            EntityKind::Blockquote => "<blockquote>".to_string(),
        }
    }

    fn close_tag(&self) -> &'static str {
        match self {
            EntityKind::Bold => "</b>",
            EntityKind::Italic => "</i>",
            EntityKind::Underline => "</u>",
            EntityKind::Strikethrough => "</s>",
            EntityKind::Spoiler => "</tg-spoiler>",
            EntityKind::Code => "</code>",
            EntityKind::Pre { language: None } => "</pre>",
            EntityKind::Pre { language: Some(_) } => "</code></pre>",
            EntityKind::TextUrl { .. } => "</a>",
            EntityKind::Blockquote => "</blockquote>",
        }
    }
}

/// Render `text` with its formatting entities as Telegram HTML.
///
/// Overlapping spans that do not nest are closed and reopened so the output is
/// always well-formed.
pub fn entities_to_html(text: &str, entities: &[TextEntity]) -> String {
    let mut sorted: Vec<&TextEntity> = entities.iter().filter(|e| e.length > 0).collect();
    sorted.sort_by(|a, b| a.offset.cmp(&b.offset).then(b.length.cmp(&a.length)));

    let mut out = String::with_capacity(text.len() + entities.len() * 8);
    let mut open: Vec<&TextEntity> = Vec::new();
    let mut next = 0usize;
    let mut pos = 0usize;

    for ch in text.chars() {
        close_ending(&mut out, &mut open, pos);
        while next < sorted.len() && sorted[next].offset <= pos {
            let e = sorted[next];
            if e.end() > pos {
                out.push_str(&e.kind.open_tag());
                open.push(e);
            }
            next += 1;
        }
        push_escaped(&mut out, ch);
        pos += ch.len_utf16();
    }

    close_ending(&mut out, &mut open, usize::MAX);
    out
}

fn close_ending<'a>(out: &mut String, open: &mut Vec<&'a TextEntity>, pos: usize) {
    while let Some(idx) = open.iter().rposition(|e| e.end() <= pos) {
        let above: Vec<&TextEntity> = open.drain(idx + 1..).collect();
        for e in above.iter().rev() {
            out.push_str(e.kind.close_tag());
        }
        if let Some(e) = open.pop() {
            out.push_str(e.kind.close_tag());
        }
        for e in above {
            out.push_str(&e.kind.open_tag());
            open.push(e);
        }
    }
}

fn push_escaped(out: &mut String, ch: char) {
    match ch {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        c => out.push(c),
    }
}
