//! Host variant dispatch
//!
//! The host ships in several structurally different builds. Anything that
//! needs to call back into host UI goes through a [`VariantTable`] built at
//! startup by the integration layer, keyed by the configured [`HostVariant`].

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Known builds of the host binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostVariant {
    Akella,
    Russobit,
    Gog,
}

impl HostVariant {
    pub const ALL: [HostVariant; 3] = [HostVariant::Akella, HostVariant::Russobit, HostVariant::Gog];

    pub fn as_str(self) -> &'static str {
        match self {
            HostVariant::Akella => "akella",
            HostVariant::Russobit => "russobit",
            HostVariant::Gog => "gog",
        }
    }
}

impl fmt::Display for HostVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HostVariant::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidVariant(s.to_string()))
    }
}

/// Opaque handle to a host dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DialogId(pub u32);

/// Action attached to a host button
pub type ButtonAction = Box<dyn Fn() + Send + Sync>;

/// Host UI entry points for one variant
pub trait HostUi: Send + Sync {
    /// Construct and show a modal message box
    fn show_message_box(&self, message: &str);

    /// Bind `action` to `button` inside `dialog`. Returns false if the
    /// button does not exist.
    fn create_button_functor(&self, dialog: DialogId, button: &str, action: ButtonAction) -> bool;

    /// Look up a dialog by name
    fn dialog(&self, name: &str) -> Option<DialogId>;
}

/// One value per host variant
#[derive(Debug, Clone)]
pub struct VariantTable<T> {
    akella: T,
    russobit: T,
    gog: T,
}

impl<T> VariantTable<T> {
    pub fn new(akella: T, russobit: T, gog: T) -> Self {
        Self {
            akella,
            russobit,
            gog,
        }
    }

    pub fn get(&self, variant: HostVariant) -> &T {
        match variant {
            HostVariant::Akella => &self.akella,
            HostVariant::Russobit => &self.russobit,
            HostVariant::Gog => &self.gog,
        }
    }
}

impl<T: Clone> VariantTable<T> {
    /// Same value for every variant
    pub fn uniform(value: T) -> Self {
        Self::new(value.clone(), value.clone(), value)
    }
}

/// UI table handed to the service
pub type HostUiTable = VariantTable<Arc<dyn HostUi>>;

/// Host UI stand-in for running without a host: message boxes go to the log
/// and are kept for inspection, there are no dialogs.
#[derive(Default)]
pub struct HeadlessUi {
    messages: Mutex<Vec<String>>,
}

impl HeadlessUi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages shown so far
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl HostUi for HeadlessUi {
    fn show_message_box(&self, message: &str) {
        tracing::warn!(message, "Host message box");
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }

    fn create_button_functor(&self, _dialog: DialogId, _button: &str, _action: ButtonAction) -> bool {
        false
    }

    fn dialog(&self, _name: &str) -> Option<DialogId> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_parse() {
        assert_eq!("akella".parse::<HostVariant>().unwrap(), HostVariant::Akella);
        assert_eq!(" GOG ".parse::<HostVariant>().unwrap(), HostVariant::Gog);
        assert!("steam".parse::<HostVariant>().is_err());
    }

    #[test]
    fn test_table_lookup() {
        let table = VariantTable::new(1, 2, 3);
        assert_eq!(*table.get(HostVariant::Akella), 1);
        assert_eq!(*table.get(HostVariant::Russobit), 2);
        assert_eq!(*table.get(HostVariant::Gog), 3);
    }

    #[test]
    fn test_headless_ui_records_messages() {
        let ui = Arc::new(HeadlessUi::new());
        let table: HostUiTable = VariantTable::uniform(ui.clone() as Arc<dyn HostUi>);

        table.get(HostVariant::Russobit).show_message_box("Lobby unavailable");

        assert_eq!(ui.messages(), vec!["Lobby unavailable".to_string()]);
        assert!(table.get(HostVariant::Gog).dialog("DLG_HOTSEAT_LOBBY").is_none());
    }
}
