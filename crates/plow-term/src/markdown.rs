// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Markdown to ANSI rendering for streamed replies.
//!
//! The renderer is a pure function of its input, so repainting a growing
//! reply every tick is just re-rendering the whole accumulated text —
//! partial markdown (an unclosed code fence, a dangling `**`) always
//! renders as *something* reasonable and corrects itself on the next tick.

use crossterm::style::{Attribute, Color, SetAttribute, SetForegroundColor};
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};

/// Text styling carried through the tag stack.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Style {
    fg: Option<Color>,
    bold: bool,
    italic: bool,
}

impl Style {
    fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    fn italic(mut self) -> Self {
        self.italic = true;
        self
    }

    fn fg(mut self, color: Color) -> Self {
        self.fg = Some(color);
        self
    }

    fn paint(&self, text: &str) -> String {
        if *self == Style::default() {
            return text.to_string();
        }
        let mut out = String::new();
        if self.bold {
            out.push_str(&SetAttribute(Attribute::Bold).to_string());
        }
        if self.italic {
            out.push_str(&SetAttribute(Attribute::Italic).to_string());
        }
        if let Some(color) = self.fg {
            out.push_str(&SetForegroundColor(color).to_string());
        }
        out.push_str(text);
        out.push_str(&SetAttribute(Attribute::Reset).to_string());
        out
    }
}

fn heading_style(level: HeadingLevel) -> Style {
    match level {
        HeadingLevel::H1 => Style::default().bold().fg(Color::Blue),
        HeadingLevel::H2 => Style::default().bold().fg(Color::Cyan),
        _ => Style::default().bold(),
    }
}

/// Render `md` into ANSI-styled lines wrapped at `width` columns.
pub fn render_markdown(md: &str, width: usize) -> String {
    let width = if width == 0 { 80 } else { width };
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut col = 0usize;
    let mut style_stack: Vec<Style> = vec![Style::default()];
    let mut in_code_block = false;

    let push_line = |lines: &mut Vec<String>, current: &mut String, col: &mut usize| {
        lines.push(std::mem::take(current));
        *col = 0;
    };

    for event in Parser::new(md) {
        let style = *style_stack.last().unwrap_or(&Style::default());
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                if !current.is_empty() {
                    push_line(&mut lines, &mut current, &mut col);
                }
                style_stack.push(heading_style(level));
            }
            Event::End(TagEnd::Heading(_)) => {
                style_stack.pop();
                push_line(&mut lines, &mut current, &mut col);
                lines.push(String::new());
            }
            Event::Start(Tag::Strong) => style_stack.push(style.bold()),
            Event::End(TagEnd::Strong) => {
                style_stack.pop();
            }
            Event::Start(Tag::Emphasis) => style_stack.push(style.italic()),
            Event::End(TagEnd::Emphasis) => {
                style_stack.pop();
            }
            Event::Start(Tag::CodeBlock(_)) => {
                if !current.is_empty() {
                    push_line(&mut lines, &mut current, &mut col);
                }
                style_stack.push(Style::default().fg(Color::Cyan));
                in_code_block = true;
            }
            Event::End(TagEnd::CodeBlock) => {
                if !current.is_empty() {
                    push_line(&mut lines, &mut current, &mut col);
                }
                style_stack.pop();
                in_code_block = false;
                lines.push(String::new());
            }
            Event::Start(Tag::Item) => {
                current.push_str("  • ");
                col += 4;
            }
            Event::End(TagEnd::Item) => push_line(&mut lines, &mut current, &mut col),
            Event::End(TagEnd::Paragraph) => {
                push_line(&mut lines, &mut current, &mut col);
                lines.push(String::new());
            }
            Event::Text(t) => {
                // Code blocks keep their own line structure; prose wraps.
                if in_code_block {
                    for (i, line) in t.lines().enumerate() {
                        if i > 0 {
                            push_line(&mut lines, &mut current, &mut col);
                        }
                        current.push_str(&style.paint(line));
                    }
                    if t.ends_with('\n') {
                        push_line(&mut lines, &mut current, &mut col);
                    }
                    continue;
                }
                for word in t.split_inclusive(' ') {
                    let word_cols = word.chars().count();
                    if col + word_cols > width && col > 0 {
                        push_line(&mut lines, &mut current, &mut col);
                    }
                    current.push_str(&style.paint(word));
                    col += word_cols;
                }
            }
            Event::Code(t) => {
                let styled = Style::default().fg(Color::Yellow).paint(&format!("`{t}`"));
                current.push_str(&styled);
                col += t.chars().count() + 2;
            }
            Event::SoftBreak => {
                current.push(' ');
                col += 1;
            }
            Event::HardBreak => push_line(&mut lines, &mut current, &mut col),
            Event::Rule => {
                if !current.is_empty() {
                    push_line(&mut lines, &mut current, &mut col);
                }
                lines.push("─".repeat(width));
                lines.push(String::new());
            }
            _ => {}
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(render_markdown("hello world", 80), "hello world");
    }

    #[test]
    fn rendering_is_deterministic() {
        let md = "# Plan\n\nChange `a.rs` and **test** it.";
        assert_eq!(render_markdown(md, 60), render_markdown(md, 60));
    }

    #[test]
    fn headings_are_bold() {
        let out = render_markdown("# Title", 80);
        assert!(out.contains("Title"));
        assert!(out.contains("\x1b[1m"), "heading should carry the bold attribute");
    }

    #[test]
    fn long_prose_wraps_at_the_given_width() {
        let md = "one two three four five six seven eight nine ten";
        let out = render_markdown(md, 20);
        for line in out.lines() {
            let visible: String = strip_ansi(line);
            assert!(visible.trim_end().len() <= 20, "line too long: {visible:?}");
        }
        assert!(out.lines().count() > 1);
    }

    #[test]
    fn wrapping_counts_chars_not_bytes() {
        // 16 visible columns but 20 bytes; must stay on one line at width 17.
        let out = render_markdown("héllö wörld çafé", 17);
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn unterminated_code_fence_still_renders() {
        let md = "Reply so far:\n\n```rust\nfn main() {";
        let out = render_markdown(md, 80);
        assert!(strip_ansi(&out).contains("fn main() {"));
    }

    #[test]
    fn growing_input_renders_a_prefix_consistently() {
        // A streamed reply re-renders from scratch each tick; earlier text
        // must come out the same once the stream has moved past it.
        let full = render_markdown("first paragraph\n\nsecond paragraph", 80);
        assert!(strip_ansi(&full).starts_with("first paragraph"));
    }

    #[test]
    fn list_items_get_bullets() {
        let out = render_markdown("- alpha\n- beta", 80);
        let plain = strip_ansi(&out);
        assert_eq!(plain.matches('•').count(), 2);
    }

    fn strip_ansi(s: &str) -> String {
        let mut out = String::new();
        let mut in_escape = false;
        for c in s.chars() {
            match (in_escape, c) {
                (false, '\x1b') => in_escape = true,
                (false, c) => out.push(c),
                (true, 'm') => in_escape = false,
                (true, _) => {}
            }
        }
        out
    }
}
