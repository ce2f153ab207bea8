//! Document editing and lifecycle outside of movement operations.
//!
//! Drafts are created, edited and deleted here; `confirm`, `mark_ready` and
//! `cancel` move them through the lifecycle. The transition to `done` is not
//! available here: it only happens as the last write of a movement operation.

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use stockmaster_core::{DocumentId, DomainError, DomainResult, ProductId, Quantity, UserId};
use stockmaster_inventory::{Document, DocumentTarget, NewLine};

use crate::movement_engine::MovementError;
use crate::store::{StockStore, StockTransaction};

/// Input for [`DocumentService::create_draft`].
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Generated as `<PREFIX>-<unix millis>` when `None`.
    pub reference: Option<String>,
    pub target: DocumentTarget,
    pub created_by: Option<UserId>,
    pub lines: Vec<NewLine>,
}

impl NewDocument {
    pub fn new(target: DocumentTarget) -> Self {
        Self {
            reference: None,
            target,
            created_by: None,
            lines: Vec::new(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn by(mut self, actor: UserId) -> Self {
        self.created_by = Some(actor);
        self
    }

    pub fn line(mut self, line: NewLine) -> Self {
        self.lines.push(line);
        self
    }
}

pub struct DocumentService<S> {
    store: S,
}

impl<S: StockStore> DocumentService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a draft after checking that every location exists and belongs
    /// to the warehouse named next to it, and that every product exists.
    #[instrument(skip(self, new), fields(kind = new.target.kind().as_str()), err)]
    pub async fn create_draft(&self, new: NewDocument) -> Result<Document, MovementError> {
        let mut tx = self.store.begin().await?;
        check_target(&mut tx, &new.target).await?;
        ensure_products(&mut tx, new.lines.iter().map(|l| l.product_id).collect()).await?;

        let now = Utc::now();
        let mut document = Document::draft(
            DocumentId::new(),
            new.reference,
            new.target,
            new.created_by,
            now,
        )?;
        for line in new.lines {
            document.add_line(line, now)?;
        }

        tx.insert_document(&document).await?;
        tx.commit().await?;

        info!(
            document_id = %document.id_typed(),
            reference = document.reference(),
            kind = document.kind().as_str(),
            lines = document.lines().len(),
            "draft document created"
        );
        Ok(document)
    }

    /// Returns the updated document and the new line number.
    pub async fn add_line(
        &self,
        id: DocumentId,
        line: NewLine,
    ) -> Result<(Document, u32), MovementError> {
        let products = vec![line.product_id];
        self.edit(id, "add line", products, move |doc, now| doc.add_line(line, now))
            .await
    }

    pub async fn remove_line(&self, id: DocumentId, line_no: u32) -> Result<Document, MovementError> {
        self.edit(id, "remove line", Vec::new(), |doc, now| doc.remove_line(line_no, now))
            .await
            .map(|(doc, ())| doc)
    }

    pub async fn set_line_quantity(
        &self,
        id: DocumentId,
        line_no: u32,
        quantity: Quantity,
    ) -> Result<Document, MovementError> {
        self.edit(id, "set line quantity", Vec::new(), |doc, now| {
            doc.set_line_quantity(line_no, quantity, now)
        })
        .await
        .map(|(doc, ())| doc)
    }

    pub async fn replace_lines(
        &self,
        id: DocumentId,
        lines: Vec<NewLine>,
    ) -> Result<Document, MovementError> {
        let products = lines.iter().map(|l| l.product_id).collect();
        self.edit(id, "replace lines", products, move |doc, now| {
            doc.replace_lines(lines, now)
        })
        .await
        .map(|(doc, ())| doc)
    }

    /// `draft → waiting`.
    pub async fn confirm(&self, id: DocumentId) -> Result<Document, MovementError> {
        self.edit(id, "confirm", Vec::new(), |doc, now| doc.confirm(now))
            .await
            .map(|(doc, ())| doc)
    }

    /// `draft | waiting → ready`.
    pub async fn mark_ready(&self, id: DocumentId) -> Result<Document, MovementError> {
        self.edit(id, "mark ready", Vec::new(), |doc, now| doc.mark_ready(now))
            .await
            .map(|(doc, ())| doc)
    }

    pub async fn cancel(&self, id: DocumentId) -> Result<Document, MovementError> {
        self.edit(id, "cancel", Vec::new(), |doc, now| doc.cancel(now))
            .await
            .map(|(doc, ())| doc)
    }

    /// Drafts only.
    #[instrument(skip(self), fields(document_id = %id), err)]
    pub async fn delete(&self, id: DocumentId) -> Result<(), MovementError> {
        let mut tx = self.store.begin().await?;
        let document = load(&mut tx, id).await?;
        document.ensure_deletable()?;
        tx.delete_document(&document).await?;
        tx.commit().await?;
        info!(reference = document.reference(), "draft document deleted");
        Ok(())
    }

    pub async fn get(&self, id: DocumentId) -> Result<Document, MovementError> {
        self.store
            .get_document(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("document {id}")).into())
    }

    async fn edit<T, F>(
        &self,
        id: DocumentId,
        action: &'static str,
        products: Vec<ProductId>,
        apply: F,
    ) -> Result<(Document, T), MovementError>
    where
        F: FnOnce(&mut Document, DateTime<Utc>) -> DomainResult<T> + Send,
        T: Send,
    {
        let mut tx = self.store.begin().await?;
        let mut document = load(&mut tx, id).await?;
        ensure_products(&mut tx, products).await?;

        let out = apply(&mut document, Utc::now())?;
        tx.save_document(&mut document).await?;
        tx.commit().await?;

        debug!(
            document_id = %id,
            reference = document.reference(),
            status = document.status().as_str(),
            action,
            "document updated"
        );
        Ok((document, out))
    }
}

async fn load(tx: &mut Box<dyn StockTransaction>, id: DocumentId) -> Result<Document, MovementError> {
    tx.load_document(id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("document {id}")).into())
}

async fn ensure_products(
    tx: &mut Box<dyn StockTransaction>,
    products: Vec<ProductId>,
) -> Result<(), MovementError> {
    for id in products {
        if tx.load_product(id).await?.is_none() {
            return Err(DomainError::not_found(format!("product {id}")).into());
        }
    }
    Ok(())
}

async fn check_target(
    tx: &mut Box<dyn StockTransaction>,
    target: &DocumentTarget,
) -> Result<(), MovementError> {
    if let DocumentTarget::Delivery { warehouse_id, .. } = target {
        if tx.load_warehouse(*warehouse_id).await?.is_none() {
            return Err(DomainError::not_found(format!("warehouse {warehouse_id}")).into());
        }
    }

    let pairs = match target {
        DocumentTarget::Receipt {
            warehouse_id,
            location_id,
            ..
        }
        | DocumentTarget::Adjustment {
            warehouse_id,
            location_id,
        } => vec![(*warehouse_id, *location_id)],
        DocumentTarget::Delivery { .. } => Vec::new(),
        DocumentTarget::Transfer {
            from_warehouse_id,
            from_location_id,
            to_warehouse_id,
            to_location_id,
        } => vec![
            (*from_warehouse_id, *from_location_id),
            (*to_warehouse_id, *to_location_id),
        ],
    };

    for (warehouse_id, location_id) in pairs {
        let location = tx
            .load_location(location_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("location {location_id}")))?;
        location.ensure_in(warehouse_id)?;
    }
    Ok(())
}
