use std::sync::Arc;
use parking_lot::{Mutex, MutexGuard};
use crate::config::{self, PlannerConfig};
use crate::error::Result;
use crate::message::{Communicator, LocalCommunicator, Mailbox};
use crate::planner::Planner;




/**
 * Everything a rank needs to move data for its distributed arrays: the
 * mailbox it talks through and the planner holding its plan caches. All
 * arrays of a rank share one context, wrapped in an `Arc`.
 */
pub struct Context<const DIM: usize> {
    planner: Mutex<Planner<DIM>>,
    mailbox: Mailbox,
}




// ============================================================================
impl<const DIM: usize> Context<DIM> {


    pub fn new<C: Communicator + 'static>(comm: C, config: PlannerConfig) -> Arc<Self> {
        let mailbox = Mailbox::new(comm);
        let planner = Planner::new(mailbox.rank(), config);

        Arc::new(Self {
            planner: Mutex::new(planner),
            mailbox,
        })
    }


    /**
     * Create a context configured from the process-wide inputs.
     */
    pub fn with_global_config<C: Communicator + 'static>(comm: C) -> Arc<Self> {
        Self::new(comm, config::global().fabarray.clone())
    }


    /**
     * A single-rank context configured from the process-wide inputs.
     */
    pub fn serial() -> Arc<Self> {
        Self::with_global_config(LocalCommunicator::serial())
    }


    pub fn rank(&self) -> usize {
        self.mailbox.rank()
    }


    pub fn size(&self) -> usize {
        self.mailbox.size()
    }


    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }


    pub fn planner(&self) -> MutexGuard<'_, Planner<DIM>> {
        self.planner.lock()
    }


    /**
     * Flush the plan caches, reporting their statistics when verbose. This
     * is collective.
     */
    pub fn finalize(&self) -> Result<()> {
        self.planner.lock().flush(&self.mailbox)?;
        Ok(())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::Context;
    use crate::config::PlannerConfig;
    use crate::message::LocalCommunicator;

    #[test]
    fn serial_context_is_rank_zero_of_one() {
        let context = Context::<2>::serial();
        assert_eq!(context.rank(), 0);
        assert_eq!(context.size(), 1);
        context.finalize().unwrap();
    }

    #[test]
    fn planner_takes_its_rank_from_the_communicator() {
        let mut group = LocalCommunicator::group(2);
        let context = Context::<1>::new(group.pop().unwrap(), PlannerConfig::default());
        assert_eq!(context.planner().rank(), 1);
    }
}
