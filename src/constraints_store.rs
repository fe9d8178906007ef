/// Constraint registry ("ConstraintsDataStore")

use crate::api::{ConstraintsApi, RequestContext, RequestStatus};
use crate::column::ColumnId;
use crate::constraint::{Constraint, ConstraintId, ConstraintsData};
use crate::error::{GridError, Result};
use crate::observable::Observable;
use log::{debug, warn};
use std::cell::Cell;
use std::rc::Rc;

pub struct ConstraintsDataStore {
    ctx: RequestContext,
    api: Rc<dyn ConstraintsApi>,
    constraints: Observable<ConstraintsData>,
    state: Observable<RequestStatus>,
    latest_request: Cell<u64>,
    destroyed: Cell<bool>,
}

impl ConstraintsDataStore {
    pub fn new(ctx: RequestContext, api: Rc<dyn ConstraintsApi>) -> Self {
        ConstraintsDataStore {
            ctx,
            api,
            constraints: Observable::new(ConstraintsData::default()),
            state: Observable::new(RequestStatus::Idle),
            latest_request: Cell::new(0),
            destroyed: Cell::new(false),
        }
    }

    pub fn constraints(&self) -> &Observable<ConstraintsData> {
        &self.constraints
    }

    pub fn state(&self) -> &Observable<RequestStatus> {
        &self.state
    }

    pub fn constraints_for_column(&self, column_id: ColumnId) -> Vec<Constraint> {
        self.constraints.get().for_column(column_id)
    }

    pub async fn fetch(&self) -> Result<Rc<ConstraintsData>> {
        if self.destroyed.get() {
            return Err(GridError::Destroyed);
        }
        let request = self.latest_request.get() + 1;
        self.latest_request.set(request);
        self.state.set(RequestStatus::Loading);
        debug!("Fetching constraints for table {} (request {})", self.ctx.table_id, request);

        let result = self.api.list(&self.ctx).await;

        if self.destroyed.get() || request != self.latest_request.get() {
            return result.map(Rc::new);
        }

        match result {
            Ok(data) => {
                let data = Rc::new(data);
                self.constraints.replace(data.clone());
                self.state.set(RequestStatus::Done);
                Ok(data)
            }
            Err(e) => {
                warn!("Constraints fetch failed for table {}: {}", self.ctx.table_id, e);
                self.state.set(RequestStatus::Error(e.status_message()));
                Err(e)
            }
        }
    }

    /// Drop a constraint on the server and reload
    pub async fn remove(&self, constraint_id: ConstraintId) -> Result<()> {
        if self.destroyed.get() {
            return Err(GridError::Destroyed);
        }
        self.api.delete(&self.ctx, constraint_id).await?;
        self.fetch().await?;
        Ok(())
    }

    pub fn destroy(&self) {
        self.destroyed.set(true);
    }
}
