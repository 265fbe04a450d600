use crate::errors::LearningError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    /// finite number of states `0..num_states`
    Multinomial { num_states: usize },
    /// real valued
    Normal,
}

impl VariableKind {
    pub fn is_discrete(&self) -> bool {
        matches!(self, VariableKind::Multinomial { .. })
    }

    pub fn num_states(&self) -> Option<usize> {
        match self {
            VariableKind::Multinomial { num_states } => Some(*num_states),
            VariableKind::Normal => None,
        }
    }
}

/// A node label of the network. Cheap to clone; never changes once
/// created by [`Variables`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    index: usize,
    name: Box<str>,
    kind: VariableKind,
}

impl Variable {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    pub fn is_discrete(&self) -> bool {
        self.kind.is_discrete()
    }
}

/// An ordered set of uniquely named variables
#[derive(Debug, Clone, Default)]
pub struct Variables {
    vars: Vec<Variable>,
    name_to_index: HashMap<Box<str>, usize>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_multinomial(&mut self, name: &str, num_states: usize) -> anyhow::Result<Variable> {
        if num_states < 2 {
            return Err(LearningError::Structural(format!(
                "multinomial variable {} needs at least two states, got {}",
                name, num_states
            ))
            .into());
        }
        self.push(name, VariableKind::Multinomial { num_states })
    }

    pub fn new_normal(&mut self, name: &str) -> anyhow::Result<Variable> {
        self.push(name, VariableKind::Normal)
    }

    fn push(&mut self, name: &str, kind: VariableKind) -> anyhow::Result<Variable> {
        if self.name_to_index.contains_key(name) {
            return Err(LearningError::Structural(format!("duplicate variable name {}", name)).into());
        }
        let var = Variable {
            index: self.vars.len(),
            name: name.into(),
            kind,
        };
        self.name_to_index.insert(name.into(), var.index);
        self.vars.push(var.clone());
        Ok(var)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Variable> {
        self.vars.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&Variable> {
        self.name_to_index.get(name).map(|&i| &self.vars[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Variable> {
        self.vars.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variables_are_indexed_in_order() -> anyhow::Result<()> {
        let mut vars = Variables::new();
        let a = vars.new_multinomial("A", 3)?;
        let y = vars.new_normal("Y")?;
        assert_eq!(a.index(), 0);
        assert_eq!(y.index(), 1);
        assert_eq!(vars.by_name("Y"), Some(&y));
        assert_eq!(a.kind().num_states(), Some(3));
        Ok(())
    }

    #[test]
    fn test_duplicate_name_rejected() -> anyhow::Result<()> {
        let mut vars = Variables::new();
        vars.new_normal("X")?;
        let err = vars.new_multinomial("X", 2).unwrap_err();
        assert!(matches!(
            LearningError::of(&err),
            Some(LearningError::Structural(_))
        ));
        Ok(())
    }
}
