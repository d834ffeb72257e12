use pulldown_cmark::{Event, Options, Parser, html};

/// Renders a chat message as HTML.
///
/// Raw HTML in the message is shown as text, so a reply cannot inject markup into the page.
pub fn render_markdown(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(text, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        event => event,
    });
    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

#[cfg(test)]
mod tests {
    use yare::parameterized;

    use super::*;

    #[parameterized(
        paragraph = { "Hello, world!", "<p>Hello, world!</p>\n" },
        emphasis = { "**bold** and *italic*", "<p><strong>bold</strong> and <em>italic</em></p>\n" },
        inline_code = { "use `cargo run`", "<p>use <code>cargo run</code></p>\n" },
        fenced_code = {
            "```rust\nfn main() {}\n```",
            "<pre><code class=\"language-rust\">fn main() {}\n</code></pre>\n"
        },
        list = { "- a\n- b", "<ul>\n<li>a</li>\n<li>b</li>\n</ul>\n" },
        strikethrough = { "~~no~~", "<p><del>no</del></p>\n" },
    )]
    fn renders_common_markdown(text: &str, expected: &str) {
        assert_eq!(render_markdown(text), expected);
    }

    #[test]
    fn raw_html_is_escaped() {
        let out = render_markdown("<script>alert(1)</script>\n\nhi <b>there</b>");
        assert!(!out.contains("<script>"), "{out}");
        assert!(!out.contains("<b>"), "{out}");
        assert!(out.contains("&lt;script&gt;"), "{out}");
        assert!(out.contains("&lt;b&gt;there&lt;/b&gt;"), "{out}");
    }
}
