//! Contact Book
//!
//! Who keeps fragments for whom. For every customer the book holds the
//! ordered supplier list (the position in that list IS the fragment slot
//! number), per-supplier handshake metadata such as the parity scheme the
//! supplier believes the customer uses, and the identity alias table that
//! records host rotations, so that `alice@id-a.net` and `alice@id-b.net`
//! can be recognized as one person after their identity server moved.

use std::fmt;

use dashmap::DashMap;

use crate::fragments::id::CustomerId;

// =============================================================================
// Supplier identity
// =============================================================================

/// Global id of one supplier node, `user@host`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SupplierId(pub String);

impl SupplierId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SupplierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SupplierId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What we know about one supplier position of one customer.
#[derive(Debug, Clone)]
pub struct SupplierInfo {
    pub id: SupplierId,

    /// Parity scheme this supplier reported for the customer, if any
    pub known_scheme: Option<String>,
}

impl SupplierInfo {
    pub fn new(id: impl Into<SupplierId>) -> Self {
        Self {
            id: id.into(),
            known_scheme: None,
        }
    }

    pub fn with_scheme(id: impl Into<SupplierId>, scheme: &str) -> Self {
        Self {
            id: id.into(),
            known_scheme: Some(scheme.to_string()),
        }
    }
}

// =============================================================================
// ContactBook
// =============================================================================

/// Supplier directory, customer-keyed, plus the identity alias table.
#[derive(Default)]
pub struct ContactBook {
    /// Ordered supplier list per customer; `None` marks a vacant position
    suppliers: DashMap<String, Vec<Option<SupplierInfo>>>,

    /// Identity alias table: any known id maps to its canonical root id
    identity_roots: DashMap<String, String>,

    /// Parity scheme hints attached to shared keys, keyed by key id
    share_schemes: DashMap<String, String>,
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn customer_key(customer: &CustomerId) -> String {
        format!("{}@{}", customer.user, customer.host)
    }

    /// Replace the supplier list of a customer.
    pub fn set_suppliers(&self, customer: &CustomerId, suppliers: Vec<Option<SupplierInfo>>) {
        self.suppliers
            .insert(Self::customer_key(customer), suppliers);
    }

    /// Ordered supplier ids, `None` for vacant positions.
    pub fn suppliers(&self, customer: &CustomerId) -> Vec<Option<SupplierId>> {
        self.suppliers
            .get(&Self::customer_key(customer))
            .map(|list| {
                list.iter()
                    .map(|info| info.as_ref().map(|i| i.id.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Supplier id at one slot position, if the position is filled.
    pub fn supplier_at(&self, customer: &CustomerId, position: usize) -> Option<SupplierId> {
        self.suppliers
            .get(&Self::customer_key(customer))
            .and_then(|list| list.get(position).cloned().flatten().map(|info| info.id))
    }

    /// Non-vacant supplier ids of a customer.
    pub fn known_suppliers(&self, customer: &CustomerId) -> Vec<SupplierId> {
        self.suppliers(customer).into_iter().flatten().collect()
    }

    pub fn num_suppliers(&self, customer: &CustomerId) -> usize {
        self.suppliers
            .get(&Self::customer_key(customer))
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Record the scheme one supplier reported during a handshake.
    pub fn set_supplier_scheme(&self, customer: &CustomerId, position: usize, scheme: &str) {
        if let Some(mut list) = self.suppliers.get_mut(&Self::customer_key(customer)) {
            if let Some(Some(info)) = list.get_mut(position) {
                info.known_scheme = Some(scheme.to_string());
            }
        }
    }

    /// Majority vote over the schemes the suppliers reported.
    ///
    /// Ties break toward the lexicographically smaller name so the answer
    /// is stable across runs.
    pub fn scheme_votes(&self, customer: &CustomerId) -> Option<String> {
        let list = self.suppliers.get(&Self::customer_key(customer))?;
        let mut counts: Vec<(String, usize)> = Vec::new();
        for info in list.iter().flatten() {
            if let Some(scheme) = &info.known_scheme {
                match counts.iter_mut().find(|(name, _)| name == scheme) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((scheme.clone(), 1)),
                }
            }
        }
        counts
            .into_iter()
            .max_by(|(a_name, a_n), (b_name, b_n)| a_n.cmp(b_n).then(b_name.cmp(a_name)))
            .map(|(name, _)| name)
    }

    // =========================================================================
    // Identity rotation
    // =========================================================================

    fn root_of(&self, id: &str) -> String {
        self.identity_roots
            .get(id)
            .map(|r| r.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Record that `rotated` is the same identity as `known`.
    pub fn register_rotation(&self, known: &str, rotated: &str) {
        let root = self.root_of(known);
        self.identity_roots.insert(rotated.to_string(), root.clone());
        self.identity_roots.insert(known.to_string(), root);
    }

    /// Whether two ids name the same identity, directly or via rotation.
    pub fn is_same_id(&self, a: &str, b: &str) -> bool {
        a == b || self.root_of(a) == self.root_of(b)
    }

    /// Whether two customers are the same person.
    ///
    /// The user name never rotates; the host may. Key aliases are not
    /// compared here, two keys of one person still belong to one identity.
    pub fn is_same_identity(&self, a: &CustomerId, b: &CustomerId) -> bool {
        if a.user != b.user {
            return false;
        }
        self.is_same_id(&Self::customer_key(a), &Self::customer_key(b))
    }

    // =========================================================================
    // Share hints
    // =========================================================================

    /// Remember the scheme attached to a shared key.
    pub fn set_share_scheme(&self, key_id: &str, scheme: &str) {
        self.share_schemes
            .insert(key_id.to_string(), scheme.to_string());
    }

    /// Scheme attached to a shared key, if known.
    pub fn share_scheme(&self, key_id: &str) -> Option<String> {
        self.share_schemes.get(key_id).map(|s| s.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> CustomerId {
        CustomerId::new("master", "alice", "idhost.org")
    }

    fn book_with_suppliers() -> ContactBook {
        let book = ContactBook::new();
        book.set_suppliers(
            &customer(),
            vec![
                Some(SupplierInfo::with_scheme("s0@host-a.net", "ecc/4x4")),
                Some(SupplierInfo::with_scheme("s1@host-b.net", "ecc/4x4")),
                None,
                Some(SupplierInfo::with_scheme("s3@host-c.net", "ecc/2x2")),
            ],
        );
        book
    }

    #[test]
    fn test_positions_and_vacancies() {
        let book = book_with_suppliers();
        assert_eq!(book.num_suppliers(&customer()), 4);
        assert_eq!(
            book.supplier_at(&customer(), 1),
            Some(SupplierId::from("s1@host-b.net"))
        );
        assert_eq!(book.supplier_at(&customer(), 2), None);
        assert_eq!(book.supplier_at(&customer(), 9), None);
        assert_eq!(book.known_suppliers(&customer()).len(), 3);
    }

    #[test]
    fn test_scheme_majority_vote() {
        let book = book_with_suppliers();
        assert_eq!(book.scheme_votes(&customer()), Some("ecc/4x4".to_string()));

        // unknown customer has no votes
        let other = CustomerId::new("master", "bob", "idhost.org");
        assert_eq!(book.scheme_votes(&other), None);
    }

    #[test]
    fn test_scheme_vote_updates() {
        let book = book_with_suppliers();
        book.set_supplier_scheme(&customer(), 0, "ecc/2x2");
        book.set_supplier_scheme(&customer(), 1, "ecc/2x2");
        assert_eq!(book.scheme_votes(&customer()), Some("ecc/2x2".to_string()));
    }

    #[test]
    fn test_identity_rotation() {
        let book = ContactBook::new();
        let before = CustomerId::new("master", "alice", "id-a.net");
        let after = CustomerId::new("master", "alice", "id-b.net");

        assert!(!book.is_same_identity(&before, &after));
        book.register_rotation("alice@id-a.net", "alice@id-b.net");
        assert!(book.is_same_identity(&before, &after));

        // a different person on the rotated host does not match
        let stranger = CustomerId::new("master", "eve", "id-b.net");
        assert!(!book.is_same_identity(&before, &stranger));
    }

    #[test]
    fn test_rotation_chains_share_one_root() {
        let book = ContactBook::new();
        book.register_rotation("alice@id-a.net", "alice@id-b.net");
        book.register_rotation("alice@id-b.net", "alice@id-c.net");
        assert!(book.is_same_id("alice@id-a.net", "alice@id-c.net"));
    }

    #[test]
    fn test_share_scheme_hints() {
        let book = ContactBook::new();
        assert_eq!(book.share_scheme("share_abc$alice@idhost.org"), None);
        book.set_share_scheme("share_abc$alice@idhost.org", "ecc/7x7");
        assert_eq!(
            book.share_scheme("share_abc$alice@idhost.org"),
            Some("ecc/7x7".to_string())
        );
    }
}
