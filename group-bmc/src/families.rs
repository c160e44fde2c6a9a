//! Partition of the K models into disjoint, non-empty families.

use crate::common::*;

/// A validated partition of the model indices `0..K` into families.
///
/// Each model belongs to exactly one family. Pooling over family members
/// is a product with the K x nf 0/1 membership matrix `C`.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyPartition {
    names: Vec<Box<str>>,
    members: Vec<Vec<usize>>,
    family_of: Vec<usize>,
}

impl FamilyPartition {
    /// Build a partition from index sets over `0..num_models`
    ///
    /// * `groups` - one index set per family
    /// * `num_models` - K
    pub fn new(groups: &[Vec<usize>], num_models: usize) -> anyhow::Result<Self> {
        if groups.is_empty() {
            anyhow::bail!("families: at least one family is required");
        }

        let mut family_of = vec![usize::MAX; num_models];

        for (f, group) in groups.iter().enumerate() {
            if group.is_empty() {
                anyhow::bail!("families: family #{} is empty", f + 1);
            }
            for &k in group {
                if k >= num_models {
                    anyhow::bail!(
                        "families: family #{} names model {} but there are only {} models",
                        f + 1,
                        k + 1,
                        num_models
                    );
                }
                if family_of[k] != usize::MAX {
                    anyhow::bail!(
                        "families: model {} belongs to both family #{} and #{}",
                        k + 1,
                        family_of[k] + 1,
                        f + 1
                    );
                }
                family_of[k] = f;
            }
        }

        if let Some(k) = family_of.iter().position(|&f| f == usize::MAX) {
            anyhow::bail!("families: model {} is not assigned to any family", k + 1);
        }

        let members = groups
            .iter()
            .map(|g| {
                let mut g = g.clone();
                g.sort_unstable();
                g
            })
            .collect();

        let names = (1..=groups.len())
            .map(|f| f.to_string().into_boxed_str())
            .collect();

        Ok(Self {
            names,
            members,
            family_of,
        })
    }

    /// Build a partition from one family label per model. Families are
    /// ordered by the first appearance of their label.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> anyhow::Result<Self> {
        let mut names: Vec<Box<str>> = vec![];
        let mut groups: Vec<Vec<usize>> = vec![];

        for (k, lab) in labels.iter().enumerate() {
            let lab = lab.as_ref().trim();
            if lab.is_empty() {
                anyhow::bail!("families: empty family label for model {}", k + 1);
            }
            match names.iter().position(|x| x.as_ref() == lab) {
                Some(f) => groups[f].push(k),
                None => {
                    names.push(lab.into());
                    groups.push(vec![k]);
                }
            }
        }

        Self::new(&groups, labels.len())?.with_names(names)
    }

    /// Replace the default names "1", "2", ...
    pub fn with_names(mut self, names: Vec<Box<str>>) -> anyhow::Result<Self> {
        if names.len() != self.num_families() {
            anyhow::bail!(
                "families: {} names for {} families",
                names.len(),
                self.num_families()
            );
        }
        self.names = names;
        Ok(self)
    }

    pub fn num_models(&self) -> usize {
        self.family_of.len()
    }

    pub fn num_families(&self) -> usize {
        self.members.len()
    }

    pub fn names(&self) -> &[Box<str>] {
        &self.names
    }

    pub fn members(&self, f: usize) -> &[usize] {
        &self.members[f]
    }

    pub fn family_of(&self, k: usize) -> usize {
        self.family_of[k]
    }

    pub fn family_size(&self, f: usize) -> usize {
        self.members[f].len()
    }

    /// K x nf indicator matrix, `C[k,f] = 1` iff model k is in family f
    pub fn membership_matrix(&self) -> Mat {
        Mat::from_fn(self.num_models(), self.num_families(), |k, f| {
            if self.family_of[k] == f {
                1.0
            } else {
                0.0
            }
        })
    }

    /// Prior concentration `1/|family(k)|` for each model, so that each
    /// family carries a total prior mass of one
    pub fn uniform_prior(&self) -> DVec {
        DVec::from_fn(self.num_models(), |k, _| {
            1.0 / self.family_size(self.family_of[k]) as f64
        })
    }

    /// Model frequencies implied by uniform-over-families,
    /// `f0[k] = 1 / (nf · |family(k)|)`
    pub fn null_frequencies(&self) -> DVec {
        self.uniform_prior() / self.num_families() as f64
    }

    /// `Cᵗ a`
    pub fn pool(&self, a: &DVec) -> DVec {
        self.membership_matrix().tr_mul(a)
    }

    /// `Cᵗ r`, pooling every column
    pub fn pool_columns(&self, r: &Mat) -> Mat {
        self.membership_matrix().tr_mul(r)
    }

    /// `Cᵗ V C`
    pub fn pool_cov(&self, v: &Mat) -> Mat {
        let cc = self.membership_matrix();
        cc.tr_mul(v) * cc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_valid_partition() -> anyhow::Result<()> {
        let fam = FamilyPartition::new(&[vec![0, 2], vec![1], vec![3, 4]], 5)?;
        assert_eq!(fam.num_families(), 3);
        assert_eq!(fam.family_of(2), 0);
        assert_eq!(fam.family_of(4), 2);

        let cc = fam.membership_matrix();
        for k in 0..5 {
            assert_abs_diff_eq!(cc.row(k).sum(), 1.0);
        }

        let prior = fam.uniform_prior();
        assert_abs_diff_eq!(prior[0], 0.5);
        assert_abs_diff_eq!(prior[1], 1.0);
        assert_abs_diff_eq!(fam.pool(&prior), DVec::from_element(3, 1.0));
        assert_abs_diff_eq!(fam.null_frequencies().sum(), 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_invalid_partitions() {
        // overlap
        assert!(FamilyPartition::new(&[vec![0, 1], vec![1, 2]], 3).is_err());
        // not covering
        assert!(FamilyPartition::new(&[vec![0], vec![2]], 3).is_err());
        // empty family
        assert!(FamilyPartition::new(&[vec![0, 1, 2], vec![]], 3).is_err());
        // out of range
        assert!(FamilyPartition::new(&[vec![0, 1, 3]], 3).is_err());
        // no family at all
        assert!(FamilyPartition::new(&[], 3).is_err());
    }

    #[test]
    fn test_from_labels() -> anyhow::Result<()> {
        let fam = FamilyPartition::from_labels(&["rl", "bayes", "rl", "bayes", "wsls"])?;
        assert_eq!(fam.num_families(), 3);
        assert_eq!(fam.names()[1].as_ref(), "bayes");
        assert_eq!(fam.members(0), &[0, 2]);
        assert_eq!(fam.members(2), &[4]);
        Ok(())
    }

    #[test]
    fn test_pool_cov() -> anyhow::Result<()> {
        let fam = FamilyPartition::new(&[vec![0, 1], vec![2]], 3)?;
        let v = Mat::from_row_slice(3, 3, &[1., 2., 3., 2., 4., 5., 3., 5., 6.]);
        let vf = fam.pool_cov(&v);
        assert_abs_diff_eq!(vf[(0, 0)], 1. + 2. + 2. + 4.);
        assert_abs_diff_eq!(vf[(0, 1)], 3. + 5.);
        assert_abs_diff_eq!(vf[(1, 1)], 6.);
        Ok(())
    }
}
