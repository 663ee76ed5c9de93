use std::collections::BTreeMap;

use crate::model::*;

/// Durable client records, keyed by id.
///
/// Identity is weak: a submission matches by email, then by phone, then by
/// the exact (name, email, phone) triple. Nothing is ever merged.
#[derive(Debug)]
pub struct ClientBook {
    clients: BTreeMap<ClientId, Client>,
    next_id: ClientId,
}

impl Default for ClientBook {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBook {
    pub fn new() -> Self {
        Self {
            clients: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    /// First client matching the (normalized) contact details.
    pub fn find_match(&self, contact: &ContactDetails) -> Option<&Client> {
        if let Some(email) = &contact.email
            && let Some(c) = self.iter().find(|c| c.email.as_ref() == Some(email))
        {
            return Some(c);
        }
        if let Some(phone) = &contact.phone
            && let Some(c) = self.iter().find(|c| c.phone.as_ref() == Some(phone))
        {
            return Some(c);
        }
        let name = contact.full_name.as_deref()?;
        self.iter()
            .find(|c| c.full_name == name && c.email == contact.email && c.phone == contact.phone)
    }

    /// Decide how a booking touches the table. Does not modify the book;
    /// the returned write is applied once the booking is durable.
    pub fn resolve(&self, contact: &ContactDetails) -> ClientWrite {
        let Some(existing) = self.find_match(contact) else {
            return ClientWrite::Created(Client {
                id: self.next_id,
                full_name: contact.full_name.clone().unwrap_or_default(),
                email: contact.email.clone(),
                phone: contact.phone.clone(),
                notes: None,
                tags: None,
            });
        };

        let mut updated = existing.clone();
        let mut changed = false;
        if updated.full_name.trim().is_empty()
            && let Some(name) = &contact.full_name
        {
            updated.full_name = name.clone();
            changed = true;
        }
        for (field, incoming) in [
            (&mut updated.email, &contact.email),
            (&mut updated.phone, &contact.phone),
        ] {
            if field.as_deref().is_none_or(|v| v.trim().is_empty()) && incoming.is_some() {
                *field = incoming.clone();
                changed = true;
            }
        }

        if changed {
            ClientWrite::Updated(updated)
        } else {
            ClientWrite::Existing(existing.id)
        }
    }

    pub fn apply(&mut self, write: &ClientWrite) {
        match write {
            ClientWrite::Existing(_) => {}
            ClientWrite::Created(c) | ClientWrite::Updated(c) => self.restore(c.clone()),
        }
    }

    /// Insert or replace a record, keeping the id counter ahead of it.
    pub fn restore(&mut self, client: Client) {
        self.next_id = self.next_id.max(client.id + 1);
        self.clients.insert(client.id, client);
    }
}
