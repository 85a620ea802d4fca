//! Physical boundary conditions, registered per (face, field).

use std::fmt;
use std::sync::Arc;

use crate::field::Field;
use crate::geometry::{num_faces, Face};

/// How a ghost cell relates to the boundary datum.
///
/// The set is closed: there is no way to hand the solver a boundary kind it
/// does not know how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BcKind {
    /// The datum is the boundary value: `x0 = 2b − x1`.
    Dirichlet,
    /// The datum is the derivative along the face axis: `x0 = x1 ± dr·b`.
    Neumann,
    /// Zero curvature across the face: `x0 = 2·x1 − x2` (no datum).
    Continuous,
}

/// The boundary datum: uniform over the face, or sampled per ghost cell at
/// the center of its boundary face.
#[derive(Clone)]
pub enum BcValue<const N: usize> {
    Uniform(f64),
    Profile(Arc<dyn Fn([f64; N]) -> f64 + Send + Sync>),
}

impl<const N: usize> BcValue<N> {
    pub fn at(&self, position: [f64; N]) -> f64 {
        match self {
            BcValue::Uniform(value) => *value,
            BcValue::Profile(profile) => profile(position),
        }
    }
}

impl<const N: usize> fmt::Debug for BcValue<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BcValue::Uniform(value) => write!(f, "Uniform({value})"),
            BcValue::Profile(_) => write!(f, "Profile(..)"),
        }
    }
}

/// One boundary condition entry.
#[derive(Debug, Clone)]
pub struct FaceCondition<const N: usize> {
    pub kind: BcKind,
    pub value: BcValue<N>,
}

impl<const N: usize> FaceCondition<N> {
    pub fn dirichlet(value: f64) -> Self {
        Self {
            kind: BcKind::Dirichlet,
            value: BcValue::Uniform(value),
        }
    }

    pub fn neumann(derivative: f64) -> Self {
        Self {
            kind: BcKind::Neumann,
            value: BcValue::Uniform(derivative),
        }
    }

    pub fn continuous() -> Self {
        Self {
            kind: BcKind::Continuous,
            value: BcValue::Uniform(0.0),
        }
    }
}

/// The full table of boundary conditions, one entry per (face, field).
#[derive(Debug, Clone)]
pub struct BoundarySet<const N: usize> {
    entries: Vec<FaceCondition<N>>,
}

impl<const N: usize> BoundarySet<N> {
    /// Homogeneous Dirichlet everywhere, the usual starting point.
    pub fn zero() -> Self {
        Self::uniform(FaceCondition::dirichlet(0.0))
    }

    /// The same condition on every face of every field.
    pub fn uniform(condition: FaceCondition<N>) -> Self {
        Self {
            entries: vec![condition; num_faces::<N>() * Field::COUNT],
        }
    }

    pub fn set(&mut self, face: Face, field: Field, condition: FaceCondition<N>) {
        self.entries[field.index() * num_faces::<N>() + face.index()] = condition;
    }

    /// Sets a field's condition on every face at once.
    pub fn set_field(&mut self, field: Field, condition: FaceCondition<N>) {
        for face in 0..num_faces::<N>() {
            self.entries[field.index() * num_faces::<N>() + face] = condition.clone();
        }
    }

    pub fn get(&self, face: Face, field: Field) -> &FaceCondition<N> {
        &self.entries[field.index() * num_faces::<N>() + face.index()]
    }
}
