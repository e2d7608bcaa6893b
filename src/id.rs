//! Name-to-id hashing for services and methods, and the two equivalent
//! `package.Service/Method` / `package.Service.Method` path syntaxes used by
//! method name resolution (see [`crate::descriptor::Services::get_method`]).

pub type Hash = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRef<'a> {
    name: &'a str,
}

impl<'a> IdRef<'a> {
    pub fn new(name: &'a str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn hash(&self) -> Hash {
        hash::hash_65599(self.name)
    }
}

impl<'a> From<&'a str> for IdRef<'a> {
    fn from(name: &'a str) -> Self {
        IdRef::new(name)
    }
}

/// A `package.Service/Method` or `package.Service.Method` path, split into
/// its service and method components.
///
/// Both separators are accepted by [`PathRef::new`]; the method name
/// resolution rules in the descriptor registry reject anything else before
/// ever constructing a `PathRef`, so this type itself doesn't validate the
/// separator — it just splits on whichever of `/` or the last `.` is
/// present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathRef<'a> {
    path: &'a str,
    split: usize,
}

impl<'a> PathRef<'a> {
    pub fn new(path: &'a str) -> Self {
        let split = path
            .rfind('/')
            .or_else(|| path.rfind('.'))
            .unwrap_or(0);

        PathRef { path, split }
    }

    pub fn service(&self) -> IdRef<'a> {
        IdRef::new(&self.path[..self.split])
    }

    pub fn method(&self) -> IdRef<'a> {
        if self.split < self.path.len() {
            IdRef::new(&self.path[self.split + 1..])
        } else {
            IdRef::new(&self.path[0..0])
        }
    }
}

mod hash {
    const HASH_CONST: u32 = 65599;

    /// The same string hash pw_rpc uses to derive 32-bit service/method ids
    /// from their fully-qualified names, so ids computed here agree with
    /// what a real peer computes from the same name.
    pub fn hash_65599(id: &str) -> u32 {
        let mut hash = id.len() as u32;
        let mut coef = HASH_CONST;

        for chr in id.chars() {
            hash = hash.wrapping_add(coef.wrapping_mul(chr as u32));
            coef = coef.wrapping_mul(HASH_CONST);
        }

        hash
    }
}
