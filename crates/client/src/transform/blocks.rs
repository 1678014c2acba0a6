//! HTML → `ContentBlock` walk and JSONL emission.

use scraper::{ElementRef, Html, Selector};
use superfetch_core::ContentBlock;

const DEFAULT_MAX_BLOCK_LENGTH: usize = 5000;
const TRUNCATION_SUFFIX: &str = "...";

fn truncate_block_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let budget = max_len.saturating_sub(TRUNCATION_SUFFIX.len());
    let mut truncated: String = text.chars().take(budget).collect();
    truncated.push_str(TRUNCATION_SUFFIX);
    truncated
}

/// Walk the body in document order, emitting one `ContentBlock` per
/// recognized element. Unrecognized elements are skipped, not
/// recursed into beyond their children.
pub fn html_to_blocks(html: &str, max_block_length: Option<usize>) -> Vec<ContentBlock> {
    let max_len = max_block_length.unwrap_or(DEFAULT_MAX_BLOCK_LENGTH);
    let document = Html::parse_document(html);
    let root = document.root_element();
    let mut blocks = Vec::new();
    walk(root, max_len, &mut blocks);
    blocks
}

fn walk(node: ElementRef, max_len: usize, out: &mut Vec<ContentBlock>) {
    for child in node.children() {
        let Some(el) = ElementRef::wrap(child) else { continue };
        let name = el.value().name();

        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<u8>().unwrap_or(1);
                let text = collect_text(el);
                if !text.is_empty() {
                    out.push(ContentBlock::Heading { level, text: truncate_block_text(&text, max_len) });
                }
            }
            "p" => {
                let text = collect_text(el);
                if !text.is_empty() {
                    out.push(ContentBlock::Paragraph { text: truncate_block_text(&text, max_len) });
                }
            }
            "ul" | "ol" => {
                let items: Vec<String> = el
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|li| li.value().name() == "li")
                    .map(|li| truncate_block_text(&collect_text(li), max_len))
                    .filter(|s| !s.is_empty())
                    .collect();
                if !items.is_empty() {
                    out.push(ContentBlock::List { ordered: name == "ol", items });
                }
            }
            "pre" => {
                let code_selector = Selector::parse("code").expect("static selector");
                let (language, text) = match el.select(&code_selector).next() {
                    Some(code) => {
                        let lang = code
                            .value()
                            .attr("class")
                            .and_then(|c| c.split_whitespace().find_map(|cls| cls.strip_prefix("language-")))
                            .map(str::to_string);
                        (lang, collect_text(code))
                    }
                    None => (None, collect_text(el)),
                };
                if !text.is_empty() {
                    out.push(ContentBlock::Code { language, text: truncate_block_text(&text, max_len) });
                }
            }
            "table" => {
                if let Some(block) = table_to_block(el, max_len) {
                    out.push(block);
                }
            }
            "img" => {
                if let Some(src) = el.value().attr("src") {
                    out.push(ContentBlock::Image {
                        src: src.to_string(),
                        alt: el.value().attr("alt").map(str::to_string),
                    });
                }
            }
            "blockquote" => {
                let text = collect_text(el);
                if !text.is_empty() {
                    out.push(ContentBlock::Blockquote { text: truncate_block_text(&text, max_len) });
                }
            }
            "script" | "style" | "svg" | "noscript" => {}
            _ => walk(el, max_len, out),
        }
    }
}

fn table_to_block(table: ElementRef, max_len: usize) -> Option<ContentBlock> {
    let row_selector = Selector::parse("tr").expect("static selector");
    let header_cell_selector = Selector::parse("th").expect("static selector");
    let data_cell_selector = Selector::parse("td").expect("static selector");

    let mut rows_iter = table.select(&row_selector);
    let first_row = rows_iter.next()?;

    let headers: Vec<String> =
        first_row.select(&header_cell_selector).map(|c| truncate_block_text(&collect_text(c), max_len)).collect();

    let mut rows = Vec::new();
    if headers.is_empty() {
        let row: Vec<String> =
            first_row.select(&data_cell_selector).map(|c| truncate_block_text(&collect_text(c), max_len)).collect();
        if !row.is_empty() {
            rows.push(row);
        }
    }

    for row in rows_iter {
        let cells: Vec<String> =
            row.select(&data_cell_selector).map(|c| truncate_block_text(&collect_text(c), max_len)).collect();
        if !cells.is_empty() {
            rows.push(cells);
        }
    }

    if headers.is_empty() && rows.is_empty() {
        return None;
    }

    Some(ContentBlock::Table { headers: if headers.is_empty() { None } else { Some(headers) }, rows })
}

fn collect_text(el: ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Serialize blocks as JSONL, one object per line, preceded by a
/// metadata line when `title`/`url` are supplied. Blocks that fail to
/// serialize are silently dropped; emission as a whole never fails.
pub fn blocks_to_jsonl(blocks: &[ContentBlock], title: Option<&str>, url: Option<&str>) -> String {
    let mut lines = Vec::with_capacity(blocks.len() + 1);

    if let Some(url) = url {
        let meta = ContentBlock::Metadata { title: title.map(str::to_string), url: url.to_string() };
        if let Ok(line) = serde_json::to_string(&meta) {
            lines.push(line);
        }
    }

    for block in blocks {
        if let Ok(line) = serde_json::to_string(block) {
            lines.push(line);
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_and_paragraph() {
        let html = "<html><body><h1>Hello</h1><p>World</p></body></html>";
        let blocks = html_to_blocks(html, None);
        assert_eq!(blocks.len(), 2);
        assert!(matches!(&blocks[0], ContentBlock::Heading { level: 1, text } if text == "Hello"));
        assert!(matches!(&blocks[1], ContentBlock::Paragraph { text } if text == "World"));
    }

    #[test]
    fn test_list_block() {
        let html = "<ul><li>one</li><li>two</li></ul>";
        let blocks = html_to_blocks(html, None);
        assert_eq!(blocks.len(), 1);
        assert!(matches!(&blocks[0], ContentBlock::List { ordered: false, items } if items.len() == 2));
    }

    #[test]
    fn test_code_block_with_language() {
        let html = r#"<pre><code class="language-rust">fn main() {}</code></pre>"#;
        let blocks = html_to_blocks(html, None);
        assert!(matches!(&blocks[0], ContentBlock::Code { language: Some(l), .. } if l == "rust"));
    }

    #[test]
    fn test_table_with_headers() {
        let html = "<table><tr><th>A</th><th>B</th></tr><tr><td>1</td><td>2</td></tr></table>";
        let blocks = html_to_blocks(html, None);
        assert!(matches!(
            &blocks[0],
            ContentBlock::Table { headers: Some(h), rows } if h.len() == 2 && rows.len() == 1
        ));
    }

    #[test]
    fn test_image_block() {
        let html = r#"<img src="a.png" alt="An image">"#;
        let blocks = html_to_blocks(html, None);
        assert!(matches!(&blocks[0], ContentBlock::Image { alt: Some(a), .. } if a == "An image"));
    }

    #[test]
    fn test_blockquote() {
        let html = "<blockquote>quoted text</blockquote>";
        let blocks = html_to_blocks(html, None);
        assert!(matches!(&blocks[0], ContentBlock::Blockquote { text } if text == "quoted text"));
    }

    #[test]
    fn test_script_and_style_skipped() {
        let html = "<script>alert(1)</script><style>.a{}</style><p>kept</p>";
        let blocks = html_to_blocks(html, None);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_truncation_applies_suffix() {
        let html = format!("<p>{}</p>", "x".repeat(100));
        let blocks = html_to_blocks(&html, Some(10));
        assert!(matches!(&blocks[0], ContentBlock::Paragraph { text } if text.ends_with("...") && text.len() == 10));
    }

    #[test]
    fn test_blocks_to_jsonl_with_metadata() {
        let blocks = vec![ContentBlock::Paragraph { text: "hi".into() }];
        let jsonl = blocks_to_jsonl(&blocks, Some("Title"), Some("https://example.com"));
        let lines: Vec<&str> = jsonl.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"type\":\"metadata\""));
        assert!(lines[1].contains("\"type\":\"paragraph\""));
    }

    #[test]
    fn test_blocks_to_jsonl_without_metadata() {
        let blocks = vec![ContentBlock::Paragraph { text: "hi".into() }];
        let jsonl = blocks_to_jsonl(&blocks, None, None);
        assert_eq!(jsonl.lines().count(), 1);
    }

    #[test]
    fn test_nested_div_descends_to_children() {
        let html = "<div><div><p>nested</p></div></div>";
        let blocks = html_to_blocks(html, None);
        assert_eq!(blocks.len(), 1);
        assert!(matches!(&blocks[0], ContentBlock::Paragraph { text } if text == "nested"));
    }
}
