use std::fmt;

use bitflags::bitflags;

use crate::error::Result;
use crate::registry::Members;

/// Names of the members each kind declares.
pub mod members {
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const VISIBLE: &str = "visible";
    pub const TEXT: &str = "text";
    pub const TITLE: &str = "title";
    pub const CLICKED: &str = "clicked";
    pub const CLOSED: &str = "closed";
}

bitflags! {
    /// Member groups a kind carries.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// `width`, `height`, `visible`
        const BASE = 1 << 0;
        /// `text`
        const TEXT = 1 << 1;
        /// `clicked` signal
        const CLICKABLE = 1 << 2;
        /// `title` cell and `closed` signal
        const TITLED = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Widget,
    Label,
    Button,
    Window,
}

impl NodeKind {
    pub const ALL: [NodeKind; 4] = [
        NodeKind::Widget,
        NodeKind::Label,
        NodeKind::Button,
        NodeKind::Window,
    ];

    pub fn capabilities(self) -> Capabilities {
        match self {
            NodeKind::Widget => Capabilities::BASE,
            NodeKind::Label => Capabilities::BASE | Capabilities::TEXT,
            NodeKind::Button => Capabilities::BASE | Capabilities::TEXT | Capabilities::CLICKABLE,
            NodeKind::Window => Capabilities::BASE | Capabilities::TITLED,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Widget => "Widget",
            NodeKind::Label => "Label",
            NodeKind::Button => "Button",
            NodeKind::Window => "Window",
        }
    }

    /// Installs the cells and signals this kind starts with.
    pub(crate) fn declare(self, m: &mut Members) -> Result<()> {
        let caps = self.capabilities();
        if caps.contains(Capabilities::BASE) {
            m.declare_cell(members::WIDTH, 0.0_f64)?;
            m.declare_cell(members::HEIGHT, 0.0_f64)?;
            m.declare_cell(members::VISIBLE, true)?;
        }
        if caps.contains(Capabilities::TEXT) {
            m.declare_cell(members::TEXT, String::new())?;
        }
        if caps.contains(Capabilities::CLICKABLE) {
            m.declare_signal::<()>(members::CLICKED)?;
        }
        if caps.contains(Capabilities::TITLED) {
            m.declare_cell(members::TITLE, String::new())?;
            m.declare_signal::<()>(members::CLOSED)?;
        }
        Ok(())
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
