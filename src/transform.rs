//! Generic recursive rewrite over the Block Tree.
//!
//! Every find-and-replace operation goes through [`rewrite_blocks`]. A list
//! that contains no rewritten block is reported as unchanged (`None`), so the
//! caller keeps the original `Arc`s and untouched subtrees stay shared.

use std::sync::Arc;

use crate::block::{AgentBlock, AgentStatus, Block, BlockTree, ToolBlock};

/// Decision returned by a visitor for one block.
pub enum Rewrite {
    /// Keep the block; recurse into agent children.
    Descend,
    /// Keep the block and its whole subtree as is.
    Skip,
    /// Replace the block; its subtree is not visited.
    Replace(Block),
}

/// Applies `visitor` depth-first, returning the rewritten list or `None` when
/// nothing changed.
pub fn rewrite_blocks<F>(blocks: &[Arc<Block>], visitor: &mut F) -> Option<Vec<Arc<Block>>>
where
    F: FnMut(&Block) -> Rewrite,
{
    let mut rewritten: Option<Vec<Arc<Block>>> = None;

    for (index, block) in blocks.iter().enumerate() {
        let replacement = match visitor(block) {
            Rewrite::Skip => None,
            Rewrite::Replace(next) => Some(Arc::new(next)),
            Rewrite::Descend => match block.as_ref() {
                Block::Agent(agent) => rewrite_blocks(&agent.children, visitor)
                    .map(|children| Arc::new(Block::Agent(agent.with_children(children)))),
                _ => None,
            },
        };

        match (replacement, rewritten.as_mut()) {
            (Some(next), Some(list)) => list.push(next),
            (Some(next), None) => {
                let mut list = Vec::with_capacity(blocks.len());
                list.extend(blocks[..index].iter().cloned());
                list.push(next);
                rewritten = Some(list);
            }
            (None, Some(list)) => list.push(Arc::clone(block)),
            (None, None) => {}
        }
    }

    rewritten
}

impl BlockTree {
    /// Tree-level wrapper over [`rewrite_blocks`].
    #[must_use]
    pub fn rewrite<F>(&self, mut visitor: F) -> Option<BlockTree>
    where
        F: FnMut(&Block) -> Rewrite,
    {
        rewrite_blocks(&self.blocks, &mut visitor).map(|blocks| BlockTree { blocks })
    }
}

/// Rewrites the first agent with `id`. `update` returning `None` leaves the
/// tree unchanged.
pub fn update_agent<F>(tree: &BlockTree, id: &str, update: F) -> Option<BlockTree>
where
    F: FnOnce(&AgentBlock) -> Option<AgentBlock>,
{
    let mut update = Some(update);
    tree.rewrite(|block| match block {
        Block::Agent(agent) if agent.id == id => match update.take().and_then(|f| f(agent)) {
            Some(next) => Rewrite::Replace(Block::Agent(next)),
            None => Rewrite::Skip,
        },
        _ if update.is_none() => Rewrite::Skip,
        _ => Rewrite::Descend,
    })
}

/// Rewrites the first tool block with `call_id`.
pub fn update_tool<F>(tree: &BlockTree, call_id: &str, update: F) -> Option<BlockTree>
where
    F: FnOnce(&ToolBlock) -> Option<ToolBlock>,
{
    let mut update = Some(update);
    tree.rewrite(|block| match block {
        Block::Tool(tool) if tool.call_id == call_id => match update.take().and_then(|f| f(tool)) {
            Some(next) => Rewrite::Replace(Block::Tool(next)),
            None => Rewrite::Skip,
        },
        _ if update.is_none() => Rewrite::Skip,
        _ => Rewrite::Descend,
    })
}

/// Replaces the child list of agent `id` using `update`.
pub fn update_agent_children<F>(tree: &BlockTree, id: &str, update: F) -> Option<BlockTree>
where
    F: FnOnce(&[Arc<Block>]) -> Option<Vec<Arc<Block>>>,
{
    update_agent(tree, id, |agent| {
        update(&agent.children).map(|children| agent.with_children(children))
    })
}

/// Marks every `running` agent in the tree as `status`.
pub fn settle_running_agents(tree: &BlockTree, status: AgentStatus) -> Option<BlockTree> {
    fn settle(blocks: &[Arc<Block>], status: AgentStatus) -> Option<Vec<Arc<Block>>> {
        rewrite_blocks(blocks, &mut |block: &Block| match block {
            Block::Agent(agent) => {
                let children = settle(&agent.children, status);
                if children.is_none() && agent.status.is_terminal() {
                    return Rewrite::Skip;
                }
                let mut next = agent.with_children(children.unwrap_or_else(|| agent.children.clone()));
                next.status = agent.status.advance(status);
                Rewrite::Replace(Block::Agent(next))
            }
            _ => Rewrite::Skip,
        })
    }

    settle(&tree.blocks, status).map(|blocks| BlockTree { blocks })
}
