/// One factor of SE(3) (rotations or translations), resolved once at construction.
#[derive(Debug, Clone)]
pub enum Factor<D> {
    Enabled(D),
    Disabled,
}

impl<D> Factor<D> {
    /// Builds the collaborator only when the factor is enabled.
    pub fn resolve<E, F>(enabled: bool, build: F) -> Result<Self, E>
    where
        F: FnOnce() -> Result<D, E>,
    {
        if enabled {
            Ok(Factor::Enabled(build()?))
        } else {
            Ok(Factor::Disabled)
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Factor::Enabled(_))
    }

    pub fn as_enabled(&self) -> Option<&D> {
        match self {
            Factor::Enabled(diffuser) => Some(diffuser),
            Factor::Disabled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_skips_construction_when_disabled() {
        let mut calls = 0;
        let factor: Factor<u32> = Factor::resolve(false, || -> Result<u32, ()> {
            calls += 1;
            Ok(1)
        })
        .unwrap();
        assert!(!factor.is_enabled());
        assert_eq!(calls, 0);
    }

    #[test]
    fn resolve_propagates_construction_errors() {
        let factor: Result<Factor<u32>, &str> = Factor::resolve(true, || Err("bad schedule"));
        assert_eq!(factor.unwrap_err(), "bad schedule");
    }

    #[test]
    fn as_enabled_exposes_collaborator() {
        let factor = Factor::Enabled(7u32);
        assert_eq!(factor.as_enabled(), Some(&7));
    }
}
