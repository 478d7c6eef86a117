use std::ops::Index;
use crate::backend::Backend;
use crate::error::Result;
use crate::manager::NDManager;
use super::NDArray;

/// # NDList
///
/// Ordered collection of arrays, addressable by position or by array name.
/// Used for block inputs and outputs and for translator payloads.
pub struct NDList<B: Backend> {
    arrays: Vec<NDArray<B>>,
}

impl<B: Backend> NDList<B> {
    pub fn new() -> Self {
        Self { arrays: vec![] }
    }

    pub fn push(&mut self, array: NDArray<B>) {
        self.arrays.push(array);
    }

    pub fn get(&self, index: usize) -> Option<&NDArray<B>> {
        self.arrays.get(index)
    }

    /// First array carrying `name`
    pub fn get_by_name(&self, name: &str) -> Option<&NDArray<B>> {
        self.arrays
            .iter()
            .find(|array| array.name().as_deref() == Some(name))
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NDArray<B>> {
        self.arrays.iter()
    }

    /// Names of the arrays, `None` for unnamed ones
    pub fn names(&self) -> Vec<Option<String>> {
        self.arrays.iter().map(NDArray::name).collect()
    }

    /// Moves every array to `manager`
    pub fn attach_to(&self, manager: &NDManager<B>) -> Result<()> {
        self.arrays.iter().try_for_each(|array| array.attach_to(manager))
    }

    pub fn close(&self) {
        self.arrays.iter().for_each(NDArray::close);
    }

    pub fn into_vec(self) -> Vec<NDArray<B>> {
        self.arrays
    }
}

impl<B: Backend> Default for NDList<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Clone for NDList<B> {
    fn clone(&self) -> Self {
        Self {
            arrays: self.arrays.clone(),
        }
    }
}

impl<B: Backend> Index<usize> for NDList<B> {
    type Output = NDArray<B>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.arrays[index]
    }
}

impl<B: Backend> From<Vec<NDArray<B>>> for NDList<B> {
    fn from(arrays: Vec<NDArray<B>>) -> Self {
        Self { arrays }
    }
}

impl<B: Backend> FromIterator<NDArray<B>> for NDList<B> {
    fn from_iter<I: IntoIterator<Item = NDArray<B>>>(iter: I) -> Self {
        Self {
            arrays: iter.into_iter().collect(),
        }
    }
}

impl<B: Backend> IntoIterator for NDList<B> {
    type Item = NDArray<B>;
    type IntoIter = std::vec::IntoIter<NDArray<B>>;

    fn into_iter(self) -> Self::IntoIter {
        self.arrays.into_iter()
    }
}

impl<'a, B: Backend> IntoIterator for &'a NDList<B> {
    type Item = &'a NDArray<B>;
    type IntoIter = std::slice::Iter<'a, NDArray<B>>;

    fn into_iter(self) -> Self::IntoIter {
        self.arrays.iter()
    }
}

impl<B: Backend> std::fmt::Debug for NDList<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.arrays.iter()).finish()
    }
}
