//! Line-oriented Textile tokenizer.
//!
//! Produces only the constructs the link graph cares about: headers, links,
//! images and link alias definitions. Everything else in the document is
//! ignored. Ranges are byte offsets into the original text; callers convert
//! them to editor positions with a rope.
//!
//! | Construct | Syntax |
//! |-----------|--------|
//! | Heading | `h2. Title`, `h2(#id). Title` |
//! | Link | `"text":target`, `["text":target]` |
//! | Image | `!src!`, `!src(alt)!`, `!src!:target` |
//! | Link definition | `[name]target` on a line of its own |
//!
//! Code blocks (`bc.`, `pre.`, `notextile.` and their extended `..` forms,
//! `<pre>` sections) and inline `@code@` spans produce no tokens.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Heading {
        level: u8,
        line: usize,
        text: String,
        /// The whole header line, markup included.
        line_range: Range<usize>,
        /// Title text only.
        text_range: Range<usize>,
    },
    Link {
        line: usize,
        href: String,
        href_range: Range<usize>,
    },
    Image {
        line: usize,
        src: String,
        src_range: Range<usize>,
        /// Target of an image link (`!src!:target`).
        href: Option<(String, Range<usize>)>,
    },
    LinkDefinition {
        line: usize,
        name: String,
        name_range: Range<usize>,
        href: String,
        href_range: Range<usize>,
    },
}

impl Token {
    /// 0-based source line the token starts on.
    pub fn line(&self) -> usize {
        match self {
            Token::Heading { line, .. }
            | Token::Link { line, .. }
            | Token::Image { line, .. }
            | Token::LinkDefinition { line, .. } => *line,
        }
    }
}

const ATTRIBUTES: &str = r"(?:\([^)]*\)|\{[^}]*\}|\[[^\]]*\]|[<>=()])*";

static HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^h(?<level>[1-6]){ATTRIBUTES}\.[ \t]+(?<text>.*)$")).unwrap()
});

static CODE_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?:bc|pre|notextile){ATTRIBUTES}\.(?<extended>\.)?(?:[ \t]|$)"
    ))
    .unwrap()
});

static BLOCK_SIGNATURE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?:h[1-6]|p|bq|bc|pre|notextile|fn\d+){ATTRIBUTES}\.\.?(?:[ \t]|$)"
    ))
    .unwrap()
});

static DEFINITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(?<name>[^\]\s]+)\](?<href>\S+)[ \t]*$").unwrap());

static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""[^"\n]+":(?<href>[^\s"<>\[\]]+)"#).unwrap());

static IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?:^|[\s(\["'>])!(?:\([^)\s]*\)|\{[^}]*\}|[<>=])*(?<src>[^\s!()]+)(?:\([^)]*\))?!(?::(?<href>[^\s"<>\[\]]+))?"#,
    )
    .unwrap()
});

static INLINE_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@[^@\n]+@|==[^=\n]+==").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Normal,
    Code { extended: bool },
    Pre,
}

/// Tokenizes `text`. Never fails; unrecognized constructs are skipped.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = vec![];
    let mut block = Block::Normal;
    let mut previous_blank = true;

    for (line_number, (line_start, line)) in lines(text).enumerate() {
        let blank = line.trim().is_empty();

        match block {
            Block::Code { extended: false } => {
                if blank {
                    block = Block::Normal;
                }
                previous_blank = blank;
                continue;
            }
            Block::Code { extended: true } => {
                if !(previous_blank && BLOCK_SIGNATURE_RE.is_match(line)) {
                    previous_blank = blank;
                    continue;
                }
                block = Block::Normal;
            }
            Block::Pre => {
                if line.contains("</pre>") {
                    block = Block::Normal;
                }
                previous_blank = blank;
                continue;
            }
            Block::Normal => {}
        }
        previous_blank = blank;

        if let Some(caps) = CODE_BLOCK_RE.captures(line) {
            block = Block::Code {
                extended: caps.name("extended").is_some(),
            };
            continue;
        }
        if line.trim_start().starts_with("<pre") {
            if !line.contains("</pre>") {
                block = Block::Pre;
            }
            continue;
        }

        tokenize_line(line, line_number, line_start, &mut tokens);
    }

    tokens
}

/// Lines of `text` with their byte offsets, broken at `\r\n`, `\r` or `\n`
/// the way LSP clients count them. Terminators are not included.
fn lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut next = 0;
    std::iter::from_fn(move || {
        if next >= text.len() {
            return None;
        }
        let start = next;
        let rest = &text[start..];
        let line = match rest.find(['\r', '\n']) {
            Some(end) => {
                let terminator = if rest[end..].starts_with("\r\n") { 2 } else { 1 };
                next = start + end + terminator;
                &rest[..end]
            }
            None => {
                next = text.len();
                rest
            }
        };
        Some((start, line))
    })
}

fn tokenize_line(line: &str, line_number: usize, line_start: usize, tokens: &mut Vec<Token>) {
    if let Some(caps) = DEFINITION_RE.captures(line) {
        let (Some(name), Some(href)) = (caps.name("name"), caps.name("href")) else {
            return;
        };
        tokens.push(Token::LinkDefinition {
            line: line_number,
            name: name.as_str().to_string(),
            name_range: line_start + name.start()..line_start + name.end(),
            href: href.as_str().to_string(),
            href_range: line_start + href.start()..line_start + href.end(),
        });
        return;
    }

    if let Some(caps) = HEADING_RE.captures(line) {
        if let (Some(level), Some(text)) = (caps.name("level"), caps.name("text")) {
            let title = text.as_str().trim_end();
            tokens.push(Token::Heading {
                level: level.as_str().parse().unwrap_or(1),
                line: line_number,
                text: title.to_string(),
                line_range: line_start..line_start + line.len(),
                text_range: line_start + text.start()..line_start + text.start() + title.len(),
            });
        }
    }

    let masked = mask_inline_code(line);

    let mut inline = vec![];
    for caps in LINK_RE.captures_iter(&masked) {
        let Some(href) = caps.name("href") else {
            continue;
        };
        let trimmed = trim_trailing_punctuation(href.as_str());
        if trimmed.is_empty() {
            continue;
        }
        let start = line_start + href.start();
        inline.push(Token::Link {
            line: line_number,
            href: trimmed.to_string(),
            href_range: start..start + trimmed.len(),
        });
    }

    for caps in IMAGE_RE.captures_iter(&masked) {
        let Some(src) = caps.name("src") else {
            continue;
        };
        let href = caps.name("href").and_then(|href| {
            let trimmed = trim_trailing_punctuation(href.as_str());
            let start = line_start + href.start();
            (!trimmed.is_empty()).then(|| (trimmed.to_string(), start..start + trimmed.len()))
        });
        inline.push(Token::Image {
            line: line_number,
            src: src.as_str().to_string(),
            src_range: line_start + src.start()..line_start + src.end(),
            href,
        });
    }

    inline.sort_by_key(|token| match token {
        Token::Link { href_range, .. } => href_range.start,
        Token::Image { src_range, .. } => src_range.start,
        _ => usize::MAX,
    });
    tokens.extend(inline);
}

/// Blanks out inline code while keeping byte offsets stable.
fn mask_inline_code(line: &str) -> String {
    let mut masked = String::with_capacity(line.len());
    let mut last = 0;
    for found in INLINE_CODE_RE.find_iter(line) {
        masked.push_str(&line[last..found.start()]);
        masked.extend(std::iter::repeat(' ').take(found.as_str().len()));
        last = found.end();
    }
    masked.push_str(&line[last..]);
    masked
}

/// Sentence punctuation directly after a link is not part of its target.
fn trim_trailing_punctuation(href: &str) -> &str {
    let mut end = href.len();
    loop {
        let current = &href[..end];
        match current.chars().next_back() {
            Some(c @ ('.' | ',' | ';' | ':' | '!' | '?' | '\'')) => end -= c.len_utf8(),
            Some(')') if current.matches('(').count() < current.matches(')').count() => end -= 1,
            _ => break,
        }
    }
    &href[..end]
}
