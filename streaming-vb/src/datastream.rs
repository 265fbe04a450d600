//! In-memory batches and the stream interface the learners pull from.

use crate::variables::*;
use std::sync::Arc;

/// One cell of a record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Discrete(usize),
    Continuous(f64),
    Missing,
}

/// Column header of a stream: a variable name and its kind
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: Box<str>,
    pub kind: VariableKind,
}

impl From<&Variable> for Attribute {
    fn from(var: &Variable) -> Self {
        Self {
            name: var.name().into(),
            kind: var.kind(),
        }
    }
}

pub fn attributes_of(variables: &Variables) -> Vec<Attribute> {
    variables.iter().map(Attribute::from).collect()
}

/// A record assigning a value to every attribute, positionally
#[derive(Debug, Clone, PartialEq)]
pub struct DataInstance {
    values: Vec<Value>,
}

impl DataInstance {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A fixed-size window of records sharing one header
#[derive(Debug, Clone)]
pub struct DataOnMemory {
    attributes: Arc<[Attribute]>,
    instances: Vec<DataInstance>,
}

impl DataOnMemory {
    pub fn new(attributes: Arc<[Attribute]>, instances: Vec<DataInstance>) -> Self {
        Self {
            attributes,
            instances,
        }
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn instances(&self) -> &[DataInstance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Split into at most `n` contiguous, nearly equal parts; empty
    /// parts are dropped.
    pub fn split_contiguous(&self, n: usize) -> Vec<DataOnMemory> {
        let n = n.max(1);
        let chunk = self.instances.len().div_ceil(n).max(1);
        self.instances
            .chunks(chunk)
            .map(|c| DataOnMemory::new(self.attributes.clone(), c.to_vec()))
            .collect()
    }
}

/// Source of fixed-size windows
pub trait DataStream: Send {
    fn attributes(&self) -> &[Attribute];

    /// Next window of at most `window_size` records, `None` once the
    /// stream is exhausted.
    fn next_batch(&mut self, window_size: usize) -> Option<DataOnMemory>;
}

/// A stream over records already held in memory
#[derive(Debug, Clone)]
pub struct VecDataStream {
    attributes: Arc<[Attribute]>,
    instances: Vec<DataInstance>,
    cursor: usize,
}

impl VecDataStream {
    pub fn new(attributes: Vec<Attribute>, instances: Vec<DataInstance>) -> Self {
        Self {
            attributes: attributes.into(),
            instances,
            cursor: 0,
        }
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// start over from the first record
    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    /// append the records of another stream with the same header
    pub fn concat(mut self, other: VecDataStream) -> Self {
        debug_assert_eq!(self.attributes, other.attributes);
        self.instances.extend(other.instances);
        self
    }
}

impl DataStream for VecDataStream {
    fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    fn next_batch(&mut self, window_size: usize) -> Option<DataOnMemory> {
        if self.cursor >= self.instances.len() || window_size == 0 {
            return None;
        }
        let end = (self.cursor + window_size).min(self.instances.len());
        let batch = DataOnMemory::new(
            self.attributes.clone(),
            self.instances[self.cursor..end].to_vec(),
        );
        self.cursor = end;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(n: usize) -> VecDataStream {
        let attrs = vec![Attribute {
            name: "A".into(),
            kind: VariableKind::Multinomial { num_states: 2 },
        }];
        let data = (0..n)
            .map(|i| DataInstance::new(vec![Value::Discrete(i % 2)]))
            .collect();
        VecDataStream::new(attrs, data)
    }

    #[test]
    fn test_windows_cover_stream() {
        let mut s = stream(25);
        let sizes: Vec<usize> = std::iter::from_fn(|| s.next_batch(10))
            .map(|b| b.len())
            .collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert!(s.next_batch(10).is_none());
    }

    #[test]
    fn test_split_contiguous() {
        let mut s = stream(10);
        let batch = s.next_batch(10).unwrap();
        let parts = batch.split_contiguous(4);
        assert_eq!(
            parts.iter().map(|p| p.len()).collect::<Vec<_>>(),
            vec![3, 3, 3, 1]
        );
        assert_eq!(parts[1].instances()[0], batch.instances()[3]);
    }
}
