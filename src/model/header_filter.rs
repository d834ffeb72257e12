use async_stream::try_stream;
use futures::StreamExt as _;

use crate::utils::BoxStream;

/// Removes a fixed tag from the front of a streamed reply.
///
/// Generation can echo the assistant header of the chat template as its first tokens, and those
/// tokens rarely arrive as a single fragment. The filter keeps a lookback window exactly as long
/// as the tag, so a tag split over any number of fragments is still seen whole before anything
/// around it is released.
///
/// When the tag is found, it is dropped together with everything ahead of it in the window.
/// Only the first occurrence is stripped; later ones pass through untouched.
#[derive(Debug, Clone)]
pub struct HeaderTagFilter {
    tag: String,
    tag_chars: usize,
    buffer: String,
    stripped: bool,
}

impl HeaderTagFilter {
    pub fn new(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        let tag_chars = tag.chars().count();
        Self {
            tag,
            tag_chars,
            buffer: String::new(),
            stripped: false,
        }
    }

    /// Feeds one fragment, returning the text that can no longer be part of the tag.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.buffer.push_str(fragment);

        if !self.stripped {
            if let Some(pos) = self.buffer.find(&self.tag) {
                self.buffer.drain(..pos + self.tag.len());
                self.stripped = true;
            }
        }

        let buffered = self.buffer.chars().count();
        if buffered <= self.tag_chars {
            return None;
        }

        // Keep the last `tag_chars` characters, release the rest.
        let split = self
            .buffer
            .char_indices()
            .nth(buffered - self.tag_chars)
            .map_or(self.buffer.len(), |(i, _)| i);
        let window = self.buffer.split_off(split);
        Some(std::mem::replace(&mut self.buffer, window))
    }

    /// Flushes whatever is still held back once the input has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// Number of characters currently held back.
    pub fn buffered_len(&self) -> usize {
        self.buffer.chars().count()
    }
}

/// Wraps a fragment stream with a [`HeaderTagFilter`]. Errors pass through unchanged.
pub fn strip_header_tag<'a>(
    mut strm: BoxStream<'a, anyhow::Result<String>>,
    tag: impl Into<String>,
) -> BoxStream<'a, anyhow::Result<String>> {
    let mut filter = HeaderTagFilter::new(tag);
    Box::pin(try_stream! {
        while let Some(fragment) = strm.next().await {
            if let Some(out) = filter.push(&fragment?) {
                yield out;
            }
        }
        if let Some(rest) = filter.finish() {
            yield rest;
        }
    })
}

#[cfg(test)]
mod tests {
    use futures::{StreamExt, stream};
    use yare::parameterized;

    use super::*;
    use crate::constants::HEADER_TAG;

    fn run(tag: &str, fragments: &[&str]) -> Vec<String> {
        let mut filter = HeaderTagFilter::new(tag);
        let mut out = Vec::new();
        for fragment in fragments {
            out.extend(filter.push(fragment));
        }
        out.extend(filter.finish());
        out
    }

    #[parameterized(
        tag_split_across_fragments = {
            &["<|start_header", "_id|>assistant<|end_header_id|>Hello", ", world!"],
            "Hello, world!"
        },
        tag_never_present = { &["Hi", " there"], "Hi there" },
        tag_in_single_fragment = { &["<|start_header_id|>assistant<|end_header_id|>\n\nSure."], "\n\nSure." },
        tag_split_per_character = {
            &["<", "|", "start_header_id", "|", ">", "assistant", "<|", "end_header_id", "|>", "O", "k"],
            "Ok"
        },
        empty_stream = { &[], "" },
        only_the_tag = { &["<|start_header_id|>assistant", "<|end_header_id|>"], "" },
        leading_noise_is_dropped = { &["\n<|start_header_id|>assistant<|end_header_id|>Hey"], "Hey" },
        second_tag_is_kept = {
            &["<|start_header_id|>assistant<|end_header_id|>A", "<|start_header_id|>assistant<|end_header_id|>B"],
            "A<|start_header_id|>assistant<|end_header_id|>B"
        },
        long_reply_without_tag = {
            &["The quick brown fox ", "jumps over the lazy dog ", "and keeps on running far away."],
            "The quick brown fox jumps over the lazy dog and keeps on running far away."
        },
    )]
    fn filters_header_tag(fragments: &[&str], expected: &str) {
        assert_eq!(run(HEADER_TAG, fragments).concat(), expected);
    }

    #[test]
    fn tag_mid_stream_drops_what_precedes_it_in_the_window() {
        assert_eq!(run("<T>", &["abc<T>def"]).concat(), "def");
        // "abcdef" was released before the tag completed; only "gh" shared its window.
        assert_eq!(run("<T>", &["abcdef", "gh<", "T>ij"]).concat(), "abcdefij");
    }

    #[test]
    fn emission_is_delayed_by_at_most_the_tag_length() {
        let mut filter = HeaderTagFilter::new("<T>");
        assert_eq!(filter.push("ab"), None);
        assert_eq!(filter.push("cd").as_deref(), Some("a"));
        assert_eq!(filter.buffered_len(), 3);
        assert_eq!(filter.finish().as_deref(), Some("bcd"));
        assert_eq!(filter.finish(), None);
    }

    #[test]
    fn buffer_never_exceeds_tag_plus_latest_fragment() {
        let fragments = [
            "<|start", "_header_id|>", "assistant<|end_header_id|>", "\n\n", "Rust ",
            "is a systems programming language ", "focused on safety.", "", "!",
        ];
        let tag_chars = HEADER_TAG.chars().count();
        let mut filter = HeaderTagFilter::new(HEADER_TAG);
        for fragment in fragments {
            filter.push(fragment);
            assert!(filter.buffered_len() <= tag_chars + fragment.chars().count());
            assert!(filter.buffered_len() <= tag_chars);
        }
    }

    #[test]
    fn no_output_fragment_leaks_a_partial_tag() {
        let input = "<|start_header_id|>assistant<|end_header_id|>Hello, world!";
        // Every way of cutting the input into three fragments.
        for i in 0..=input.len() {
            for j in i..=input.len() {
                let pieces = [&input[..i], &input[i..j], &input[j..]];
                let out = run(HEADER_TAG, &pieces);
                assert_eq!(out.concat(), "Hello, world!", "split at {i}/{j}");
                for piece in &out {
                    assert!(!piece.contains("<|"), "leaked {piece:?} for split {i}/{j}");
                }
            }
        }
    }

    #[test]
    fn multibyte_text_is_never_split_inside_a_character() {
        let out = run("<T>", &["안녕", "하세요 ", "🦀🦀"]);
        assert_eq!(out.concat(), "안녕하세요 🦀🦀");
        assert!(out.iter().all(|s| !s.is_empty()));
    }

    #[test]
    fn empty_tag_passes_everything_through() {
        assert_eq!(run("", &["a", "b"]), vec!["a".to_owned(), "b".to_owned()]);
    }

    crate::async_test! {
        async fn stream_adapter_strips_and_flushes() {
            let input: Vec<anyhow::Result<String>> = vec![
                Ok("<|start_header".into()),
                Ok("_id|>assistant<|end_header_id|>Hello".into()),
                Ok(", world!".into()),
            ];
            let strm = strip_header_tag(Box::pin(stream::iter(input)), HEADER_TAG);
            let out: Vec<String> = strm.map(|r| r.unwrap()).collect().await;
            assert_eq!(out.concat(), "Hello, world!");
        }
    }

    crate::async_test! {
        async fn stream_adapter_propagates_errors() {
            let input: Vec<anyhow::Result<String>> = vec![
                Ok("partial".into()),
                Err(anyhow::anyhow!("generation failed")),
                Ok("never seen".into()),
            ];
            let mut strm = strip_header_tag(Box::pin(stream::iter(input)), HEADER_TAG);
            let mut saw_error = false;
            while let Some(item) = strm.next().await {
                if let Err(e) = item {
                    assert_eq!(e.to_string(), "generation failed");
                    saw_error = true;
                    break;
                }
            }
            assert!(saw_error);
        }
    }
}
