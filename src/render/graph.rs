//! Ordered chain of filter nodes.
//!
//! The graph owns one program and one framebuffer per stage. Node `i` reads
//! the output of node `i - 1` (node 0 reads the graph source) and every node
//! can also sample the source, which is what compositing stages blend over.

use tracing::{debug, warn};

use crate::render::backend::{FilterPass, ProgramHandle, RenderBackend, TextureHandle};
use crate::render::error::{RenderError, Result};
use crate::render::filters::FilterStage;

#[derive(Debug, Clone)]
pub struct FilterNode {
    stage: FilterStage,
    program: ProgramHandle,
    framebuffer: TextureHandle,
}

impl FilterNode {
    pub fn stage(&self) -> &FilterStage {
        &self.stage
    }

    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    /// Output texture, `NULL` until the graph has been sized.
    pub fn framebuffer(&self) -> TextureHandle {
        self.framebuffer
    }
}

#[derive(Debug)]
pub struct FilterGraph {
    stages: Vec<FilterStage>,
    nodes: Vec<FilterNode>,
    size: Option<(u32, u32)>,
}

impl FilterGraph {
    pub fn new(stages: Vec<FilterStage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(RenderError::EmptyChain);
        }
        Ok(Self {
            stages,
            nodes: Vec::new(),
            size: None,
        })
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    pub fn nodes(&self) -> &[FilterNode] {
        &self.nodes
    }

    pub fn is_built(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// Current framebuffer size, `None` before the first resize.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }

    pub fn terminal(&self) -> Option<&FilterNode> {
        self.nodes.last()
    }

    /// Create one program per stage. All-or-nothing: on failure every
    /// program created so far is destroyed again.
    pub fn build(&mut self, backend: &mut dyn RenderBackend) -> Result<()> {
        if self.is_built() {
            warn!("filter graph already built; release it before rebuilding");
            return Ok(());
        }

        let mut nodes = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            match backend.create_program(stage.kind) {
                Ok(program) => nodes.push(FilterNode {
                    stage: *stage,
                    program,
                    framebuffer: TextureHandle::NULL,
                }),
                Err(e) => {
                    for node in nodes {
                        backend.destroy_program(node.program);
                    }
                    return Err(e);
                }
            }
        }

        debug!(stages = nodes.len(), "filter graph built");
        self.nodes = nodes;
        Ok(())
    }

    /// Make every framebuffer `width` x `height`.
    ///
    /// The new generation is created in full before the old one is freed.
    /// If any allocation fails the partial generation is destroyed and the
    /// graph keeps its previous framebuffers. Returns whether anything was
    /// reallocated.
    pub fn resize(
        &mut self,
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> Result<bool> {
        if !self.is_built() {
            return Err(RenderError::NotReady);
        }
        if self.size == Some((width, height)) {
            return Ok(false);
        }

        let mut fresh = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            match backend.create_texture(width, height, node.stage.kind.label()) {
                Ok(texture) => fresh.push(texture),
                Err(e) => {
                    warn!(width, height, "filter graph resize failed: {e}");
                    for texture in fresh {
                        backend.destroy_texture(texture);
                    }
                    return Err(e);
                }
            }
        }

        for (node, texture) in self.nodes.iter_mut().zip(fresh) {
            let old = std::mem::replace(&mut node.framebuffer, texture);
            if !old.is_null() {
                backend.destroy_texture(old);
            }
        }
        debug!(from = ?self.size, to = ?(width, height), "filter graph resized");
        self.size = Some((width, height));
        Ok(true)
    }

    /// Run every node in order over `source`; returns the terminal output.
    pub fn run(
        &self,
        backend: &mut dyn RenderBackend,
        source: TextureHandle,
    ) -> Result<TextureHandle> {
        let (width, height) = self.size.ok_or(RenderError::NotReady)?;
        let mut input = source;
        for node in &self.nodes {
            let uniforms = node.stage.uniforms(width, height);
            backend.dispatch(&FilterPass {
                program: node.program,
                input,
                source,
                output: node.framebuffer,
                uniforms: &uniforms,
            })?;
            input = node.framebuffer;
        }
        self.terminal()
            .map(|node| node.framebuffer)
            .ok_or(RenderError::NotReady)
    }

    /// Free every program and framebuffer. Safe to call repeatedly.
    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        for node in self.nodes.drain(..) {
            if !node.framebuffer.is_null() {
                backend.destroy_texture(node.framebuffer);
            }
            backend.destroy_program(node.program);
        }
        self.size = None;
    }
}
