//! Uniform write access to an avatar's mouth blend controls.
//!
//! Avatars expose one of two incompatible control schemas. Newer models carry
//! an expression manager keyed by semantic names (`aa`, `ee`, ...), older ones
//! a blend-shape proxy keyed by short codes (`a`, `e`, ...). The schema is
//! detected once when an [`ExpressionTarget`] is built; every write after that
//! dispatches straight to the detected variant.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Expression control surface of newer avatar models.
pub trait ExpressionManager: Send + Sync {
    /// Whether the model defines the named expression.
    fn has_expression(&self, _name: &str) -> bool {
        true
    }

    fn set_value(&self, name: &str, weight: f32) -> Result<()>;
}

/// Blend-shape control surface of older avatar models.
pub trait BlendShapeProxy: Send + Sync {
    fn set_value(&self, name: &str, weight: f32) -> Result<()>;
}

/// An avatar handle that may expose either control schema.
///
/// Both accessors returning `None` is normal while the model is still loading.
pub trait Avatar {
    fn expression_manager(&self) -> Option<Arc<dyn ExpressionManager>> {
        None
    }

    fn blend_shape_proxy(&self) -> Option<Arc<dyn BlendShapeProxy>> {
        None
    }
}

/// The control schema an [`ExpressionTarget`] dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpressionSchema {
    ExpressionManager,
    BlendShapeProxy,
}

/// Generic vowel mouth controls shared by both schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouthShape {
    /// Open mouth. Also the control driven by the volume strategy.
    A,
    E,
    I,
    O,
    U,
}

impl MouthShape {
    pub const ALL: [MouthShape; 5] = [
        MouthShape::A,
        MouthShape::E,
        MouthShape::I,
        MouthShape::O,
        MouthShape::U,
    ];

    /// The generic control used for loudness-driven animation.
    pub const OPEN: MouthShape = MouthShape::A;

    /// Control name on the expression manager schema.
    pub fn expression_name(self) -> &'static str {
        match self {
            MouthShape::A => "aa",
            MouthShape::E => "ee",
            MouthShape::I => "ih",
            MouthShape::O => "oh",
            MouthShape::U => "ou",
        }
    }

    /// Control name on the blend-shape proxy schema.
    pub fn blend_shape_name(self) -> &'static str {
        match self {
            MouthShape::A => "a",
            MouthShape::E => "e",
            MouthShape::I => "i",
            MouthShape::O => "o",
            MouthShape::U => "u",
        }
    }

    pub fn name_for(self, schema: ExpressionSchema) -> &'static str {
        match schema {
            ExpressionSchema::ExpressionManager => self.expression_name(),
            ExpressionSchema::BlendShapeProxy => self.blend_shape_name(),
        }
    }
}

/// Write handle over whichever control schema an avatar exposes.
///
/// Writes never fail from the caller's point of view: a detached target
/// ignores them and schema errors are logged and dropped, so animation loops
/// keep running against a missing or half-initialised avatar.
///
/// Driving the same avatar from both lip sync strategies at once is not
/// supported; they write overlapping vowel controls.
#[derive(Clone, Default)]
pub enum ExpressionTarget {
    ExpressionManager(Arc<dyn ExpressionManager>),
    BlendShapeProxy(Arc<dyn BlendShapeProxy>),
    #[default]
    Detached,
}

impl ExpressionTarget {
    /// Picks the schema exposed by `avatar`, preferring the expression manager.
    ///
    /// Use [`ExpressionTarget::Detached`] when no avatar has been loaded yet.
    pub fn detect(avatar: &dyn Avatar) -> Self {
        if let Some(manager) = avatar.expression_manager() {
            Self::ExpressionManager(manager)
        } else if let Some(proxy) = avatar.blend_shape_proxy() {
            Self::BlendShapeProxy(proxy)
        } else {
            tracing::debug!("avatar exposes no expression schema; mouth writes are ignored");
            Self::Detached
        }
    }

    pub fn schema(&self) -> Option<ExpressionSchema> {
        match self {
            Self::ExpressionManager(_) => Some(ExpressionSchema::ExpressionManager),
            Self::BlendShapeProxy(_) => Some(ExpressionSchema::BlendShapeProxy),
            Self::Detached => None,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, Self::Detached)
    }

    /// Writes `weight` to the schema-specific control behind `shape`.
    pub fn set_mouth_weight(&self, shape: MouthShape, weight: f32) {
        if let Some(schema) = self.schema() {
            self.set_weight(shape.name_for(schema), weight);
        }
    }

    /// Writes `weight` to a control named in the detected schema's own terms.
    ///
    /// The weight is clamped to `[0, 1]`; non-finite weights are written as 0.
    pub fn set_weight(&self, name: &str, weight: f32) {
        let weight = clamp_weight(weight);
        let outcome = match self {
            Self::ExpressionManager(manager) => {
                if !manager.has_expression(name) {
                    tracing::trace!(name, "expression not defined on model");
                    return;
                }
                manager.set_value(name, weight)
            }
            Self::BlendShapeProxy(proxy) => proxy.set_value(name, weight),
            Self::Detached => return,
        };

        if let Err(err) = outcome {
            tracing::debug!(name, weight, error = %err, "ignoring failed expression write");
        }
    }
}

impl fmt::Debug for ExpressionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionTarget")
            .field("schema", &self.schema())
            .finish()
    }
}

fn clamp_weight(weight: f32) -> f32 {
    if weight.is_finite() {
        weight.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingAvatar, RecordingSurface};

    #[test]
    fn prefers_expression_manager() {
        let avatar = RecordingAvatar::with_both();
        let target = ExpressionTarget::detect(&avatar);
        assert_eq!(target.schema(), Some(ExpressionSchema::ExpressionManager));

        target.set_mouth_weight(MouthShape::OPEN, 0.5);
        assert_eq!(avatar.expressions().weight("aa"), Some(0.5));
        assert!(avatar.blend_shapes().writes().is_empty());
    }

    #[test]
    fn falls_back_to_blend_shape_proxy() {
        let avatar = RecordingAvatar::blend_shapes_only();
        let target = ExpressionTarget::detect(&avatar);
        assert_eq!(target.schema(), Some(ExpressionSchema::BlendShapeProxy));

        target.set_mouth_weight(MouthShape::O, 1.0);
        assert_eq!(avatar.blend_shapes().weight("o"), Some(1.0));
    }

    #[test]
    fn missing_schemas_are_a_silent_no_op() {
        let avatar = RecordingAvatar::empty();
        let target = ExpressionTarget::detect(&avatar);
        assert!(target.is_detached());

        target.set_mouth_weight(MouthShape::A, 0.7);
        target.set_weight("aa", 0.7);
        assert!(avatar.expressions().writes().is_empty());
        assert!(avatar.blend_shapes().writes().is_empty());

        assert!(ExpressionTarget::default().is_detached());
    }

    #[test]
    fn clamps_weights() {
        let avatar = RecordingAvatar::expressions_only();
        let target = ExpressionTarget::detect(&avatar);

        target.set_weight("aa", 1.7);
        assert_eq!(avatar.expressions().weight("aa"), Some(1.0));
        target.set_weight("aa", -0.3);
        assert_eq!(avatar.expressions().weight("aa"), Some(0.0));
        target.set_weight("aa", f32::NAN);
        assert_eq!(avatar.expressions().weight("aa"), Some(0.0));
    }

    #[test]
    fn skips_undefined_expressions() {
        let surface = RecordingSurface::default().with_defined(&["ee"]);
        let avatar = RecordingAvatar::from_expressions(surface);
        let target = ExpressionTarget::detect(&avatar);

        target.set_mouth_weight(MouthShape::A, 0.4);
        target.set_mouth_weight(MouthShape::E, 0.4);
        assert_eq!(avatar.expressions().weight("aa"), None);
        assert_eq!(avatar.expressions().weight("ee"), Some(0.4));
    }

    #[test]
    fn swallows_schema_failures() {
        let surface = RecordingSurface::default().failing();
        let avatar = RecordingAvatar::from_expressions(surface);
        let target = ExpressionTarget::detect(&avatar);

        target.set_mouth_weight(MouthShape::A, 0.4);
        assert!(avatar.expressions().writes().is_empty());
    }

    #[test]
    fn shape_names_follow_schema() {
        let names: Vec<_> = MouthShape::ALL
            .iter()
            .map(|shape| shape.name_for(ExpressionSchema::ExpressionManager))
            .collect();
        assert_eq!(names, ["aa", "ee", "ih", "oh", "ou"]);
        assert_eq!(
            MouthShape::U.name_for(ExpressionSchema::BlendShapeProxy),
            "u"
        );
    }
}
