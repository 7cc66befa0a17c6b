use std::sync::Arc;

use crate::block::{Block, TextBlock, TextKind, Tone};

/// Appends `delta` to a block list using the append-or-create rule.
///
/// The delta extends the last block when it is text of the same kind and
/// otherwise starts a new text block. Returns `None` when the list is left
/// unchanged: empty deltas, and deliveries whose text already ends the target
/// block (duplicate suffix).
pub fn append_delta(blocks: &[Arc<Block>], kind: TextKind, delta: &str) -> Option<Vec<Arc<Block>>> {
    if delta.is_empty() {
        return None;
    }

    let last_text = blocks
        .last()
        .and_then(|block| block.as_text())
        .filter(|text| text.kind == kind && text.hints.tone.is_none());

    let mut next = blocks.to_vec();
    match last_text {
        Some(text) => {
            if is_duplicate_suffix(&text.content, delta) {
                return None;
            }
            let mut extended = text.clone();
            extended.content.push_str(delta);
            let last = next.len() - 1;
            next[last] = Arc::new(Block::Text(extended));
        }
        None => next.push(Arc::new(Block::text(kind, delta))),
    }
    Some(next)
}

/// True when `delta` is a redelivery of text the target already ends with.
#[must_use]
pub fn is_duplicate_suffix(content: &str, delta: &str) -> bool {
    content.ends_with(delta)
}

/// Appends `marker` to the last normal text block, or adds a notice block.
pub fn append_notice(blocks: &[Arc<Block>], marker: &str) -> Vec<Arc<Block>> {
    let mut next = blocks.to_vec();
    let last_normal = blocks
        .last()
        .and_then(|block| block.as_text())
        .filter(|text| text.kind == TextKind::Normal && text.hints.tone.is_none());

    match last_normal {
        Some(text) => {
            let mut extended = text.clone();
            if !extended.content.ends_with('\n') {
                extended.content.push_str("\n\n");
            }
            extended.content.push_str(marker);
            let last = next.len() - 1;
            next[last] = Arc::new(Block::Text(extended));
        }
        None => next.push(Arc::new(Block::Text(
            TextBlock::new(TextKind::Normal, marker).with_tone(Tone::Notice),
        ))),
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(blocks: &[Arc<Block>]) -> Vec<(&'static str, &str)> {
        blocks
            .iter()
            .filter_map(|block| block.as_text())
            .map(|text| {
                let kind = match text.kind {
                    TextKind::Normal => "normal",
                    TextKind::Reasoning => "reasoning",
                };
                (kind, text.content.as_str())
            })
            .collect()
    }

    #[test]
    fn same_kind_deltas_extend_the_last_block() {
        let blocks = append_delta(&[], TextKind::Normal, "Hel").expect("first delta");
        let blocks = append_delta(&blocks, TextKind::Normal, "lo").expect("second delta");
        assert_eq!(contents(&blocks), vec![("normal", "Hello")]);
    }

    #[test]
    fn kind_switch_starts_a_new_block() {
        let blocks = append_delta(&[], TextKind::Reasoning, "think").expect("reasoning");
        let blocks = append_delta(&blocks, TextKind::Normal, "answer").expect("text");
        let blocks = append_delta(&blocks, TextKind::Reasoning, "more").expect("reasoning");
        assert_eq!(
            contents(&blocks),
            vec![
                ("reasoning", "think"),
                ("normal", "answer"),
                ("reasoning", "more")
            ]
        );
    }

    #[test]
    fn repeated_delta_is_dropped_including_whitespace() {
        let blocks = append_delta(&[], TextKind::Normal, "chunk").expect("first");
        assert!(append_delta(&blocks, TextKind::Normal, "chunk").is_none());
        assert!(append_delta(&blocks, TextKind::Normal, "").is_none());

        let blocks = append_delta(&blocks, TextKind::Normal, "\n").expect("newline");
        assert!(append_delta(&blocks, TextKind::Normal, "\n").is_none());
        assert_eq!(contents(&blocks), vec![("normal", "chunk\n")]);
    }

    #[test]
    fn notice_appends_to_open_text_or_stands_alone() {
        let blocks = append_delta(&[], TextKind::Normal, "partial").expect("text");
        let with_marker = append_notice(&blocks, "[Interrupted]");
        assert_eq!(contents(&with_marker), vec![("normal", "partial\n\n[Interrupted]")]);

        let reasoning = append_delta(&[], TextKind::Reasoning, "hmm").expect("reasoning");
        let with_marker = append_notice(&reasoning, "[Interrupted]");
        assert_eq!(with_marker.len(), 2);
        assert_eq!(
            with_marker[1].as_text().and_then(|text| text.hints.tone),
            Some(Tone::Notice)
        );
    }
}
