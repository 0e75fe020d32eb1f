use crate::error::ForwardtestResult;
use crate::forwardtest::ForwardTest;
use crate::models::{CallbackDescriptor, ExitCallbackParams, InitCallbackParams};
use crate::service::ForwardtestService;
use crate::tasks::{exit_task_id, init_task_id, ChildTask, ParentClosePolicy};
use chrono::Utc;
use uuid::Uuid;

impl ForwardtestService {
    /// Moves the forward test to `Running`, persists it, then runs the init callback.
    /// A failing callback does not roll the status back.
    pub async fn start_forwardtest(&self, id: Uuid) -> ForwardtestResult<()> {
        let forwardtest = self.load(id).await?;
        let (saved, ()) = self.save_with(forwardtest, ForwardTest::start).await?;
        log::info!("Forward test {} is running", id);

        let payload = InitCallbackParams {
            context: self.run_context(id, Utc::now()),
        };
        let task = self.lifecycle_task(
            init_task_id(id),
            &saved.callbacks.on_init,
            &payload,
        )?;
        self.tasks.run_to_completion(task).await
    }

    /// Moves the forward test to `Finished`, persists it, then runs the exit callback.
    /// Price forwarding stops on the next tick the relay receives.
    pub async fn stop_forwardtest(&self, id: Uuid) -> ForwardtestResult<()> {
        let forwardtest = self.load(id).await?;
        let (saved, ()) = self.save_with(forwardtest, ForwardTest::finish).await?;
        log::info!("Forward test {} is finished", id);

        let payload = ExitCallbackParams {
            context: self.run_context(id, Utc::now()),
        };
        let task = self.lifecycle_task(
            exit_task_id(id),
            &saved.callbacks.on_exit,
            &payload,
        )?;
        self.tasks.run_to_completion(task).await
    }

    fn lifecycle_task<P: serde::Serialize>(
        &self,
        task_id: String,
        callback: &CallbackDescriptor,
        payload: &P,
    ) -> ForwardtestResult<ChildTask> {
        ChildTask::new(
            task_id,
            &callback.task_queue,
            &callback.name,
            callback.effective_timeout(self.settings.default_callback_timeout),
            ParentClosePolicy::Terminate,
            payload,
        )
    }
}
