//! Extraction of the delimited plan payload from root text.
//!
//! Only root normal text takes part. The first complete `<PLAN>` … `</PLAN>`
//! pair across the concatenated root text becomes a [`PlanBlock`] placed
//! where the closing delimiter ended. Once a root plan block exists, later
//! delimiters are only stripped.

use std::sync::Arc;

use crate::block::{Block, BlockTree, PlanBlock, TextBlock, TextKind};

pub const PLAN_OPEN: &str = "<PLAN>";
pub const PLAN_CLOSE: &str = "</PLAN>";

/// True when appending `delta` to root text can complete a delimiter.
///
/// Both delimiters end in `>` and root text only grows at its end, so a delta
/// without `>` leaves an already-extracted tree unchanged.
#[must_use]
pub fn may_complete_delimiter(delta: &str) -> bool {
    delta.contains('>')
}

/// Applies plan extraction or marker stripping to `tree`.
///
/// Returns `None` when the tree needs no change.
#[must_use]
pub fn extract_plan(tree: &BlockTree) -> Option<BlockTree> {
    if tree.root_plan().is_some() {
        return strip_markers(&tree.blocks).map(|blocks| BlockTree { blocks });
    }

    let segments = root_text_segments(&tree.blocks);
    let concatenated: String = segments.iter().map(|segment| segment.content).collect();
    let open = concatenated.find(PLAN_OPEN)?;
    let payload_start = open + PLAN_OPEN.len();
    let close = payload_start + concatenated[payload_start..].find(PLAN_CLOSE)?;
    let close_end = close + PLAN_CLOSE.len();
    let payload = concatenated[payload_start..close].trim().to_string();

    let mut blocks = Vec::with_capacity(tree.blocks.len() + 2);
    let mut segment_iter = segments.iter().peekable();
    for (index, block) in tree.blocks.iter().enumerate() {
        let Some(segment) = segment_iter.next_if(|segment| segment.index == index) else {
            blocks.push(Arc::clone(block));
            continue;
        };
        let Some(text) = block.as_text() else {
            blocks.push(Arc::clone(block));
            continue;
        };

        let start = segment.start;
        let end = start + segment.content.len();
        if start >= close_end || end <= open {
            push_stripped(&mut blocks, block, text, text.content.clone());
            continue;
        }

        let before = &segment.content[..open.saturating_sub(start).min(segment.content.len())];
        let after = &segment.content[close_end.saturating_sub(start).min(segment.content.len())..];
        if close_end > start && close_end <= end {
            push_stripped(&mut blocks, block, text, before.to_string());
            blocks.push(Arc::new(Block::Plan(PlanBlock {
                content: payload.clone(),
            })));
            push_stripped(&mut blocks, block, text, after.to_string());
        } else {
            push_stripped(&mut blocks, block, text, format!("{before}{after}"));
        }
    }

    Some(BlockTree { blocks })
}

struct Segment<'a> {
    index: usize,
    start: usize,
    content: &'a str,
}

fn root_text_segments(blocks: &[Arc<Block>]) -> Vec<Segment<'_>> {
    let mut offset = 0;
    blocks
        .iter()
        .enumerate()
        .filter_map(|(index, block)| {
            let text = block.as_text().filter(|text| text.kind == TextKind::Normal)?;
            let segment = Segment {
                index,
                start: offset,
                content: &text.content,
            };
            offset += text.content.len();
            Some(segment)
        })
        .collect()
}

fn remove_markers(content: &str) -> String {
    content.replace(PLAN_OPEN, "").replace(PLAN_CLOSE, "")
}

/// Pushes `content` with markers removed, dropping blocks that end up blank.
fn push_stripped(blocks: &mut Vec<Arc<Block>>, original: &Arc<Block>, text: &TextBlock, content: String) {
    let content = remove_markers(&content);
    if content == text.content {
        blocks.push(Arc::clone(original));
    } else if !content.trim().is_empty() {
        blocks.push(Arc::new(Block::Text(TextBlock {
            kind: text.kind,
            content,
            hints: text.hints.clone(),
        })));
    }
}

fn strip_markers(blocks: &[Arc<Block>]) -> Option<Vec<Arc<Block>>> {
    let needs_strip = blocks.iter().any(|block| {
        block
            .as_text()
            .filter(|text| text.kind == TextKind::Normal)
            .is_some_and(|text| text.content.contains(PLAN_OPEN) || text.content.contains(PLAN_CLOSE))
    });
    if !needs_strip {
        return None;
    }

    let mut next = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block.as_text().filter(|text| text.kind == TextKind::Normal) {
            Some(text) => push_stripped(&mut next, block, text, text.content.clone()),
            None => next.push(Arc::clone(block)),
        }
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::block::ToolBlock;

    fn text(content: &str) -> Block {
        Block::text(TextKind::Normal, content)
    }

    fn plan(content: &str) -> Block {
        Block::Plan(PlanBlock {
            content: content.to_string(),
        })
    }

    fn tool(call_id: &str) -> Block {
        Block::Tool(ToolBlock {
            call_id: call_id.to_string(),
            tool_name: "run_terminal_command".to_string(),
            input: serde_json::Value::Null,
            output: None,
            agent_id: None,
        })
    }

    fn plain(tree: &BlockTree) -> Vec<Block> {
        tree.blocks.iter().map(|block| block.as_ref().clone()).collect()
    }

    #[test]
    fn incomplete_plan_is_left_alone() {
        let tree = BlockTree::new(vec![text("Intro <PLAN>step one")]);
        assert!(extract_plan(&tree).is_none());
    }

    #[test]
    fn single_block_plan_splits_around_the_payload() {
        let tree = BlockTree::new(vec![text("Intro <PLAN>  step one  </PLAN> outro")]);
        let extracted = extract_plan(&tree).expect("complete plan");
        assert_eq!(
            plain(&extracted),
            vec![text("Intro "), plan("step one"), text(" outro")]
        );
    }

    #[test]
    fn plan_spanning_blocks_is_placed_at_the_closing_delimiter() {
        let tree = BlockTree::new(vec![
            text("Here is the plan: <PLAN>1. read"),
            tool("call-1"),
            text(" 2. write</PLAN>"),
        ]);
        let extracted = extract_plan(&tree).expect("complete plan");
        assert_eq!(
            plain(&extracted),
            vec![
                text("Here is the plan: "),
                tool("call-1"),
                plan("1. read 2. write"),
            ]
        );
    }

    #[test]
    fn reasoning_text_never_participates() {
        let tree = BlockTree::new(vec![Block::text(TextKind::Reasoning, "<PLAN>x</PLAN>")]);
        assert!(extract_plan(&tree).is_none());
    }

    #[test]
    fn second_plan_is_stripped_but_not_extracted() {
        let tree = BlockTree::new(vec![
            plan("first"),
            text("again <PLAN>second</PLAN> done"),
        ]);
        let stripped = extract_plan(&tree).expect("markers stripped");
        assert_eq!(
            plain(&stripped),
            vec![plan("first"), text("again second done")]
        );
        assert!(extract_plan(&stripped).is_none());
    }

    #[test]
    fn unclosed_markers_are_removed_after_extraction() {
        let tree = BlockTree::new(vec![
            text("<PLAN>only</PLAN>"),
            tool("call-1"),
            text("<PLAN>"),
        ]);
        let extracted = extract_plan(&tree).expect("complete plan");
        assert_eq!(plain(&extracted), vec![plan("only"), tool("call-1")]);
    }

    #[test]
    fn only_deltas_with_a_closing_bracket_can_complete_a_delimiter() {
        assert!(may_complete_delimiter("</PLAN>"));
        assert!(may_complete_delimiter(">"));
        assert!(!may_complete_delimiter("<PLAN"));
        assert!(!may_complete_delimiter("plain prose"));
    }
}
