use crate::types::{meta, BlockKind, InlineStyle};

use super::{html_title, html_to_blocks, image_sources};

#[test]
fn preserves_dom_order() {
    let html = r#"
        <h1>Title</h1>
        <p>Intro text.</p>
        <ul><li>One</li><li>Two</li></ul>
        <p>Tail.</p>
        "#;
    let blocks = html_to_blocks(html);
    let kinds: Vec<_> = blocks.iter().map(|b| b.kind).collect();
    assert_eq!(
        kinds,
        vec![
            BlockKind::Heading,
            BlockKind::Paragraph,
            BlockKind::ListItem,
            BlockKind::ListItem,
            BlockKind::Paragraph
        ]
    );
    assert_eq!(blocks[0].plain_text(), "Title");
    assert_eq!(blocks[3].plain_text(), "Two");
    assert_eq!(blocks[4].plain_text(), "Tail.");
}

#[test]
fn inline_markup_becomes_styled_segments() {
    let html = r#"<p>Read <em>this</em> and <strong>that</strong>,
        then <code>run()</code>.</p>"#;
    let blocks = html_to_blocks(html);
    let segments = &blocks[0].segments;
    assert_eq!(blocks[0].plain_text(), "Read this and that, then run().");
    assert!(segments
        .iter()
        .any(|s| s.style == InlineStyle::Italic && s.text == "this"));
    assert!(segments
        .iter()
        .any(|s| s.style == InlineStyle::Bold && s.text == "that"));
    assert!(segments
        .iter()
        .any(|s| s.style == InlineStyle::Code && s.text == "run()"));
}

#[test]
fn q_elements_are_quote_spans() {
    let blocks = html_to_blocks("<p>She said <q>hello</q> twice.</p>");
    let quote = blocks[0]
        .segments
        .iter()
        .find(|s| s.style == InlineStyle::Quote)
        .unwrap();
    assert_eq!(quote.text, "\u{201C}hello\u{201D}");
}

#[test]
fn ordered_lists_number_and_nest() {
    let html = r#"<ol start="3"><li>Three<ul><li>inner</li></ul></li><li>Four</li></ol>"#;
    let blocks = html_to_blocks(html);
    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks[0].plain_text(), "Three");
    assert_eq!(blocks[0].meta_usize(meta::ORDINAL), Some(3));
    assert_eq!(blocks[1].meta_usize(meta::DEPTH), Some(1));
    assert_eq!(blocks[1].meta(meta::ORDERED), Some("false"));
    assert_eq!(blocks[2].meta_usize(meta::ORDINAL), Some(4));
}

#[test]
fn pre_keeps_line_breaks_and_language() {
    let html = "<pre><code class=\"language-rust\">fn a() {}\n    b();\n</code></pre>";
    let blocks = html_to_blocks(html);
    assert_eq!(blocks[0].kind, BlockKind::Code);
    assert_eq!(blocks[0].meta(meta::LANG), Some("rust"));
    assert_eq!(blocks[0].plain_text(), "fn a() {}\n    b();");
}

#[test]
fn figures_become_image_spacers() {
    let html = r#"<figure><img src="map.png?v=2" alt="Old map" width="400" height="300"/>
        <figcaption>The valley</figcaption></figure>"#;
    let blocks = html_to_blocks(html);
    let image = &blocks[0];
    assert_eq!(image.kind, BlockKind::ImageSpacer);
    assert_eq!(image.meta(meta::SRC), Some("map.png"));
    assert_eq!(image.meta(meta::ALT), Some("Old map"));
    assert_eq!(image.meta_usize(meta::WIDTH), Some(400));
    assert_eq!(image.meta(meta::CAPTION), Some("The valley"));
}

#[test]
fn loose_text_between_blocks_is_kept() {
    let blocks = html_to_blocks("<div>Loose <b>words</b><p>Para</p>tail</div>");
    let texts: Vec<_> = blocks.iter().map(|b| b.plain_text()).collect();
    assert_eq!(texts, vec!["Loose words", "Para", "tail"]);
}

#[test]
fn title_and_image_sources() {
    let html = r#"<html><head><title> Night Train </title></head>
        <body><img src="a.png"/><p><img src="a.png"/><img src="b.jpg"/></p></body></html>"#;
    assert_eq!(html_title(html).as_deref(), Some("Night Train"));
    assert_eq!(image_sources(html), vec!["a.png", "b.jpg"]);
}
