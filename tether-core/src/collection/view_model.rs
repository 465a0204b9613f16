//! Editable overlay on an observable object.

use crate::error::{Error, Result};
use crate::reactive::{ObservableMap, ObservableObject, Runtime};

/// Local, uncommitted edits on top of a model object.
///
/// Reads of a field return the local value when one was set and the
/// model's value otherwise. Nothing reaches the model until [`submit`].
///
/// [`submit`]: ViewModel::submit
///
/// ```
/// use tether_core::collection::ViewModel;
/// use tether_core::reactive::ObservableObject;
///
/// let model = ObservableObject::from_entries(vec![("title", "Test".to_string())]);
/// let view = ViewModel::new(model.clone(), ["title"]);
///
/// view.set("title", "Get tea".to_string()).unwrap();
/// assert_eq!(model.get("title").as_deref(), Some("Test"));
/// assert!(view.is_dirty());
///
/// view.submit();
/// assert_eq!(model.get("title").as_deref(), Some("Get tea"));
/// assert!(!view.is_dirty());
/// ```
pub struct ViewModel<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    model: ObservableObject<V>,
    fields: Vec<String>,
    local: ObservableMap<String, V>,
}

impl<V> ViewModel<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Wrap `model`, exposing only `fields`.
    pub fn new<I, S>(model: ObservableObject<V>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            model,
            fields: fields.into_iter().map(Into::into).collect(),
            local: ObservableMap::named("ViewModel.localValues"),
        }
    }

    pub fn model(&self) -> &ObservableObject<V> {
        &self.model
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    fn check_field(&self, field: &str) -> Result<()> {
        if self.fields.iter().any(|known| known == field) {
            Ok(())
        } else {
            Err(Error::read_only(format!("field '{field}' outside the view model")))
        }
    }

    pub fn get(&self, field: &str) -> Option<V> {
        let key = field.to_string();
        if self.local.contains_key(&key) {
            self.local.get(&key)
        } else {
            self.model.get(field)
        }
    }

    /// Diverge `field` from the model. Setting it back to the model's value
    /// clears the divergence.
    pub fn set(&self, field: &str, value: V) -> Result<()> {
        self.check_field(field)?;
        Runtime::run_in_action("ViewModel.set", || {
            let key = field.to_string();
            if Some(&value) == self.model.get(field).as_ref() {
                self.local.delete(&key);
            } else {
                self.local.set(key, value);
            }
        });
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        !self.local.is_empty()
    }

    pub fn is_property_dirty(&self, field: &str) -> bool {
        self.local.contains_key(&field.to_string())
    }

    /// Fields that diverge from the model, with their local values.
    pub fn changed_values(&self) -> Vec<(String, V)> {
        self.local.entries()
    }

    /// Write every local value to the model and stop diverging.
    pub fn submit(&self) {
        Runtime::run_in_action("ViewModel.submit", || {
            for (field, value) in self.local.entries() {
                self.model.set(field, value);
            }
            self.local.clear();
        });
    }

    /// Drop every local value.
    pub fn reset(&self) {
        Runtime::run_in_action("ViewModel.reset", || self.local.clear());
    }

    pub fn reset_property(&self, field: &str) {
        Runtime::run_in_action("ViewModel.resetProperty", || {
            self.local.delete(&field.to_string());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Effect;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn todo() -> ObservableObject<String> {
        ObservableObject::from_entries(vec![
            ("title", "Test".to_string()),
            ("owner", "ada".to_string()),
        ])
    }

    #[test]
    fn proxies_model_until_diverged() {
        let model = todo();
        let view = ViewModel::new(model.clone(), ["title", "owner"]);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (v, s) = (Arc::new(view), seen.clone());
        let view = v.clone();
        let _effect = Effect::new(move || s.lock().push(v.get("title").unwrap_or_default()));

        model.set("title", "Get coffee".to_string());
        view.set("title", "Get tea".to_string()).unwrap();
        model.set("title", "Ignored".to_string());
        view.reset();

        assert_eq!(
            *seen.lock(),
            vec!["Test", "Get coffee", "Get tea", "Ignored"]
        );
    }

    #[test]
    fn setting_model_value_clears_divergence() {
        let view = ViewModel::new(todo(), ["title"]);

        view.set("title", "Other".to_string()).unwrap();
        assert!(view.is_property_dirty("title"));
        view.set("title", "Test".to_string()).unwrap();
        assert!(!view.is_property_dirty("title"));
        assert!(!view.is_dirty());
    }

    #[test]
    fn submit_writes_changed_values() {
        let model = todo();
        let view = ViewModel::new(model.clone(), ["title", "owner"]);

        view.set("owner", "grace".to_string()).unwrap();
        assert_eq!(view.changed_values(), vec![("owner".to_string(), "grace".to_string())]);
        assert_eq!(model.get("owner").as_deref(), Some("ada"));

        view.submit();
        assert_eq!(model.get("owner").as_deref(), Some("grace"));
        assert!(view.changed_values().is_empty());
    }

    #[test]
    fn reset_property_only_drops_that_field() {
        let view = ViewModel::new(todo(), ["title", "owner"]);
        view.set("title", "A".to_string()).unwrap();
        view.set("owner", "B".to_string()).unwrap();

        view.reset_property("title");
        assert_eq!(view.get("title").as_deref(), Some("Test"));
        assert_eq!(view.get("owner").as_deref(), Some("B"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let view = ViewModel::new(todo(), ["title"]);
        assert!(matches!(
            view.set("owner", "x".to_string()),
            Err(Error::ReadOnly(_))
        ));
        assert_eq!(view.fields(), ["title".to_string()]);
    }
}
