#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A bound value. Every name is bound exactly once.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(usize);

pub fn name(id: usize) -> Name {
    Name(id)
}

impl Name {
    pub fn name(self) -> usize {
        self.0
    }
}

/// A linear supply of fresh names.
///
/// One supply must be threaded through every transformation of a given lambda; handing out the
/// same number twice would break single assignment.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default)]
pub struct NameSource {
    next: usize,
}

impl NameSource {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// A supply that never produces a name already occurring in `lam`.
    pub fn after(lam: &crate::Lambda) -> Self {
        let next = crate::free::max_name(lam).map_or(0, |x| x.name() + 1);
        Self { next }
    }

    pub fn fresh(&mut self) -> Name {
        let x = Name(self.next);
        self.next += 1;
        x
    }

    /// Skip past every name in `lam` if this supply hasn't already.
    pub fn reserve(&mut self, lam: &crate::Lambda) {
        if let Some(x) = crate::free::max_name(lam) {
            self.next = self.next.max(x.name() + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_is_linear() {
        let mut names = NameSource::new();
        let a = names.fresh();
        let b = names.fresh();
        assert_eq!(a, name(0));
        assert_eq!(b, name(1));
    }
}
