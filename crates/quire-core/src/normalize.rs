mod html;
mod images;
mod inline;

#[cfg(test)]
mod tests;

pub use html::{html_title, html_to_blocks, image_sources};
