//! `fetchr cancel <task_id>` – stop one task of a running `fetchr get`.

use anyhow::Result;
use fetchr_core::control::control_socket_path;

use crate::cli::control_socket;

pub async fn run_cancel(task_id: &str) -> Result<()> {
    let path = control_socket_path()?;
    if control_socket::send_cancel(&path, task_id).await? {
        println!("Cancel requested for {task_id}");
    } else {
        println!("No running fetchr get is listening on {}", path.display());
    }
    Ok(())
}
