//! Host-side controller.
//!
//! Owns the sending half of the host → sandbox channel and gates every
//! message on sandbox readiness. Property updates are additionally gated on
//! the last confirmed load matching the caller's component. A violation is
//! dropped silently (returned as [`Dispatch::Dropped`], never an error).
//!
//! Loads are tagged with a monotonic generation. Compilation is never
//! cancelled: a completion whose ticket is no longer the newest is simply
//! discarded, and sandbox results for older generations are ignored.

use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use super::{
    normalize_override_groups, ComponentType, HostMessage, LoadComponent, OverrideGroup,
    PreviewLayout, Props, SandboxEvent, StylesheetCache, SubElement, ThemeSettings,
};
use crate::css::PseudoState;
use crate::CompiledPreview;

/// Outcome of one attempted send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Sent,
    /// Buffered until the sandbox reports ready.
    Queued,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotReady,
    /// The confirmed load is a different component.
    StaleComponent,
    /// A newer load was started.
    Superseded,
    Unchanged,
    ChannelClosed,
}

/// Identity of one in-flight load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub generation: u64,
    pub component_name: String,
}

/// Everything a `LOAD_COMPONENT` carries besides the compiled code.
#[derive(Debug, Clone, Default)]
pub struct LoadRequest {
    pub css: Option<String>,
    pub props: Props,
    pub default_props: Props,
    pub wrapper: Option<String>,
    pub component_type: ComponentType,
    pub disable_animations: bool,
    pub element_props: Option<BTreeMap<String, Props>>,
}

/// Whether a sandbox event belongs to the current load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Accepted,
    Stale,
}

pub struct HostController {
    outbox: UnboundedSender<HostMessage>,
    ready: bool,
    generation: u64,
    in_flight: Option<LoadTicket>,
    /// Component whose load the sandbox confirmed with `RENDER_SUCCESS`.
    confirmed: Option<LoadTicket>,
    /// Single-slot buffer for a load issued before `SANDBOX_READY`.
    pending_load: Option<HostMessage>,
    stylesheets: StylesheetCache,
}

impl HostController {
    pub fn new(outbox: UnboundedSender<HostMessage>) -> Self {
        Self {
            outbox,
            ready: false,
            generation: 0,
            in_flight: None,
            confirmed: None,
            pending_load: None,
            stylesheets: StylesheetCache::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn confirmed_component(&self) -> Option<&str> {
        self.confirmed.as_ref().map(|t| t.component_name.as_str())
    }

    pub fn stylesheets(&self) -> &StylesheetCache {
        &self.stylesheets
    }

    /// Start a load. Any earlier ticket becomes stale.
    pub fn begin_load(&mut self, component_name: &str) -> LoadTicket {
        self.generation += 1;
        let ticket = LoadTicket {
            generation: self.generation,
            component_name: component_name.to_string(),
        };
        self.in_flight = Some(ticket.clone());
        tracing::debug!("Load {} started for {}", ticket.generation, component_name);
        ticket
    }

    /// Dispatch a finished compilation. Stale tickets are dropped.
    pub fn complete_load(
        &mut self,
        ticket: &LoadTicket,
        compiled: CompiledPreview,
        request: LoadRequest,
    ) -> Dispatch {
        if ticket.generation != self.generation {
            tracing::debug!(
                "Dropping load {} for {}: superseded by {}",
                ticket.generation,
                ticket.component_name,
                self.generation
            );
            return Dispatch::Dropped(DropReason::Superseded);
        }

        if let Some(ref css) = request.css {
            self.stylesheets.store(&ticket.component_name, css);
        }

        // A deserialized preview only carries the flattened text.
        let code = if compiled.bundle.registration_trailer.is_empty() {
            compiled.code
        } else {
            compiled.bundle.into_code()
        };

        let message = HostMessage::LoadComponent(LoadComponent {
            code,
            css: request.css,
            props: request.props,
            default_props: request.default_props,
            component_name: compiled.component_name,
            wrapper: request.wrapper,
            component_type: request.component_type,
            disable_animations: request.disable_animations,
            element_props: request.element_props,
            generation: ticket.generation,
        });

        if !self.ready {
            tracing::debug!("Sandbox not ready, queueing load {}", ticket.generation);
            self.pending_load = Some(message);
            return Dispatch::Queued;
        }
        self.send(message)
    }

    /// Track readiness and load confirmation from sandbox events.
    pub fn handle_event(&mut self, event: &SandboxEvent) -> EventOutcome {
        match event {
            SandboxEvent::SandboxReady => {
                self.ready = true;
                self.confirmed = None;
                if let Some(message) = self.pending_load.take() {
                    tracing::debug!("Sandbox ready, flushing queued load");
                    self.send(message);
                }
                EventOutcome::Accepted
            }
            SandboxEvent::RenderSuccess { generation } => {
                if *generation != self.generation {
                    return EventOutcome::Stale;
                }
                self.confirmed = self.in_flight.clone();
                EventOutcome::Accepted
            }
            SandboxEvent::LoadError { generation, error }
            | SandboxEvent::RenderError { generation, error } => {
                if *generation != self.generation {
                    return EventOutcome::Stale;
                }
                tracing::warn!("Preview failed for load {}: {}", generation, error);
                self.confirmed = None;
                EventOutcome::Accepted
            }
            _ => EventOutcome::Accepted,
        }
    }

    /// Send a prop update for `component_name`. `None` removes a prop.
    pub fn update_props(
        &mut self,
        component_name: &str,
        props: BTreeMap<String, Option<Value>>,
    ) -> Dispatch {
        if !self.ready {
            return Dispatch::Dropped(DropReason::NotReady);
        }
        if self.confirmed_component() != Some(component_name) {
            tracing::debug!(
                "Dropping props for {}: confirmed component is {:?}",
                component_name,
                self.confirmed_component()
            );
            return Dispatch::Dropped(DropReason::StaleComponent);
        }
        let props = props
            .into_iter()
            .map(|(k, v)| (k, v.unwrap_or(Value::Null)))
            .collect();
        self.send(HostMessage::UpdateProps { props })
    }

    pub fn apply_overrides(&mut self, groups: Vec<OverrideGroup>) -> Dispatch {
        self.send_when_ready(HostMessage::ApplyStyleOverrides {
            override_groups: normalize_override_groups(groups, None, None),
            selector: None,
            overrides: None,
        })
    }

    pub fn force_state(&mut self, state: PseudoState, component_css: Option<String>) -> Dispatch {
        self.send_when_ready(HostMessage::ForceState {
            state,
            component_css,
        })
    }

    /// Hot-reload a component stylesheet. Unchanged text is not sent.
    pub fn update_css(&mut self, component_name: &str, css: &str) -> Dispatch {
        if !self.ready {
            return Dispatch::Dropped(DropReason::NotReady);
        }
        if !self.stylesheets.store(component_name, css) {
            return Dispatch::Dropped(DropReason::Unchanged);
        }
        self.send(HostMessage::UpdateCss {
            css: css.to_string(),
        })
    }

    pub fn update_theme_css(&mut self, theme_css: String) -> Dispatch {
        self.send_when_ready(HostMessage::UpdateThemeCss { theme_css })
    }

    pub fn set_theme(&mut self, settings: ThemeSettings) -> Dispatch {
        self.send_when_ready(HostMessage::SetTheme(settings))
    }

    pub fn set_layout(&mut self, layout: PreviewLayout) -> Dispatch {
        self.send_when_ready(HostMessage::SetLayout { layout })
    }

    pub fn set_inspector(&mut self, enabled: bool) -> Dispatch {
        self.send_when_ready(if enabled {
            HostMessage::EnableInspector
        } else {
            HostMessage::DisableInspector
        })
    }

    pub fn update_interactive_state(
        &mut self,
        sub_elements: Vec<SubElement>,
        selected_sub_element: Option<String>,
        enabled: bool,
    ) -> Dispatch {
        self.send_when_ready(HostMessage::UpdateInteractiveState {
            sub_elements,
            selected_sub_element,
            enabled,
        })
    }

    /// Ask for computed styles of the root, or of a sub-element.
    pub fn request_styles(&mut self, sub_selector: Option<String>) -> Dispatch {
        self.send_when_ready(match sub_selector {
            Some(sub_selector) => HostMessage::RequestSubStyles { sub_selector },
            None => HostMessage::RequestStyles,
        })
    }

    fn send_when_ready(&mut self, message: HostMessage) -> Dispatch {
        if !self.ready {
            tracing::debug!("Dropping {}: sandbox not ready", message.kind());
            return Dispatch::Dropped(DropReason::NotReady);
        }
        self.send(message)
    }

    fn send(&mut self, message: HostMessage) -> Dispatch {
        let kind = message.kind();
        match self.outbox.send(message) {
            Ok(()) => Dispatch::Sent,
            Err(_) => {
                tracing::warn!("Sandbox channel closed, dropping {}", kind);
                self.ready = false;
                Dispatch::Dropped(DropReason::ChannelClosed)
            }
        }
    }
}
