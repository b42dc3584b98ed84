//! Debug layer output and object naming.

use tracing::{debug, error, trace, warn};
use windows::Win32::Graphics::Direct3D::WKPDID_D3DDebugObjectName;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11DeviceChild, ID3D11InfoQueue, D3D11_MESSAGE, D3D11_MESSAGE_SEVERITY_CORRUPTION,
    D3D11_MESSAGE_SEVERITY_ERROR, D3D11_MESSAGE_SEVERITY_INFO, D3D11_MESSAGE_SEVERITY_WARNING,
};

/// Name `child` in graphics debuggers and debug layer messages.
pub fn set_debug_name(child: &ID3D11DeviceChild, name: &str) {
    // SAFETY: the pointer and length describe `name`, which the runtime copies.
    let result = unsafe {
        child.SetPrivateData(
            &WKPDID_D3DDebugObjectName,
            name.len() as u32,
            Some(name.as_ptr().cast()),
        )
    };
    if let Err(e) = result {
        trace!("Could not name '{name}': {e}");
    }
}

/// Forward every stored debug layer message to tracing and clear the queue.
pub fn drain_messages(queue: &ID3D11InfoQueue) {
    // SAFETY: each message is read into storage of the size the queue
    // reports for it, aligned for `D3D11_MESSAGE`.
    unsafe {
        let count = queue.GetNumStoredMessages();
        for index in 0..count {
            let mut length = 0usize;
            if queue.GetMessage(index, None, &mut length).is_err() || length == 0 {
                continue;
            }
            let mut storage = vec![0u64; length.div_ceil(8)];
            let message = storage.as_mut_ptr().cast::<D3D11_MESSAGE>();
            if queue.GetMessage(index, Some(message), &mut length).is_err() {
                continue;
            }
            let message = &*message;
            let bytes = std::slice::from_raw_parts(message.pDescription, message.DescriptionByteLength);
            let text = String::from_utf8_lossy(bytes);
            let text = text.trim_end_matches('\0');
            match message.Severity {
                D3D11_MESSAGE_SEVERITY_CORRUPTION | D3D11_MESSAGE_SEVERITY_ERROR => {
                    error!("D3D11 [{}]: {text}", message.ID.0);
                }
                D3D11_MESSAGE_SEVERITY_WARNING => warn!("D3D11 [{}]: {text}", message.ID.0),
                D3D11_MESSAGE_SEVERITY_INFO => debug!("D3D11: {text}"),
                _ => trace!("D3D11: {text}"),
            }
        }
        queue.ClearStoredMessages();
    }
}
