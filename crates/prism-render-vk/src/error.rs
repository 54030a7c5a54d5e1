// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Broad failure family, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No adapter, queue family, extension or format fits.
    Capability,
    /// A device object could not be created.
    ResourceCreation,
    /// Host to device copy failed.
    Transfer,
    /// Acquire, submit, present or a frame wait failed.
    FrameLoop,
}

/// Whether a smarter caller could recover (e.g. by recreating the swapchain).
/// This version treats both as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Recoverable,
    Fatal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("vkCreateInstance failed: {0}")]
    InstanceCreation(vk::Result),

    #[error("surface creation failed: {0}")]
    SurfaceCreation(vk::Result),

    #[error("surface query failed: {0}")]
    SurfaceQuery(vk::Result),

    #[error("adapter query failed: {0}")]
    AdapterQuery(vk::Result),

    #[error("no adapter meets the requirements")]
    NoAdapter,

    #[error("adapter `{adapter}` has no graphics + present queue family pair")]
    NoQueueFamily { adapter: String },

    #[error("vkCreateDevice failed: {0}")]
    DeviceCreation(vk::Result),

    #[error("surface reports no formats")]
    NoSurfaceFormat,

    #[error("swapchain creation failed: {0}")]
    SwapchainCreation(vk::Result),

    #[error("swapchain image view creation failed: {0}")]
    ImageViewCreation(vk::Result),

    #[error("framebuffer creation failed: {0}")]
    FramebufferCreation(vk::Result),

    #[error("render pass creation failed: {0}")]
    RenderPassCreation(vk::Result),

    #[error("failed to load shader `{name}`: {source}")]
    ShaderLoad {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shader module creation failed: {0}")]
    ShaderModuleCreation(vk::Result),

    #[error("pipeline layout creation failed: {0}")]
    PipelineLayout(vk::Result),

    #[error("graphics pipeline creation failed: {0}")]
    GraphicsPipelineCreation(vk::Result),

    #[error("no memory type matches bits {type_bits:#b} with {required:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("buffer creation failed: {0}")]
    BufferCreation(vk::Result),

    #[error("memory allocation failed: {0}")]
    MemoryAllocation(vk::Result),

    #[error("memory mapping failed: {0}")]
    MemoryMapping(vk::Result),

    #[error("zero-length upload")]
    EmptyUpload,

    #[error("buffer transfer failed: {0}")]
    Transfer(vk::Result),

    #[error("command pool/buffer setup failed: {0}")]
    CommandRecording(vk::Result),

    #[error("semaphore/fence creation failed: {0}")]
    SyncObjectCreation(vk::Result),

    #[error("fence wait failed: {0}")]
    FenceWait(vk::Result),

    #[error("fence reset failed: {0}")]
    FenceReset(vk::Result),

    #[error("acquire_next_image failed: {0}")]
    Acquire(vk::Result),

    #[error("queue_submit failed: {0}")]
    Submit(vk::Result),

    #[error("queue_present failed: {0}")]
    Present(vk::Result),

    #[error("wait for idle failed: {0}")]
    WaitIdle(vk::Result),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        use EngineError::*;
        match self {
            Loader(_)
            | AdapterQuery(_)
            | SurfaceQuery(_)
            | NoAdapter
            | NoQueueFamily { .. }
            | NoSurfaceFormat
            | NoSuitableMemoryType { .. } => ErrorKind::Capability,
            MemoryMapping(_) | EmptyUpload | Transfer(_) => ErrorKind::Transfer,
            FenceWait(_) | FenceReset(_) | Acquire(_) | Submit(_) | Present(_) | WaitIdle(_) => {
                ErrorKind::FrameLoop
            }
            _ => ErrorKind::ResourceCreation,
        }
    }

    pub fn recovery(&self) -> Recovery {
        let stale = [vk::Result::ERROR_OUT_OF_DATE_KHR, vk::Result::SUBOPTIMAL_KHR];
        match self {
            EngineError::Acquire(r) | EngineError::Present(r) if stale.contains(r) => {
                Recovery::Recoverable
            }
            _ => Recovery::Fatal,
        }
    }

    /// The raw Vulkan status behind this error, if there is one.
    pub fn vk_result(&self) -> Option<vk::Result> {
        use EngineError::*;
        match self {
            InstanceCreation(r)
            | SurfaceCreation(r)
            | SurfaceQuery(r)
            | AdapterQuery(r)
            | DeviceCreation(r)
            | SwapchainCreation(r)
            | ImageViewCreation(r)
            | FramebufferCreation(r)
            | RenderPassCreation(r)
            | ShaderModuleCreation(r)
            | PipelineLayout(r)
            | GraphicsPipelineCreation(r)
            | BufferCreation(r)
            | MemoryAllocation(r)
            | MemoryMapping(r)
            | Transfer(r)
            | CommandRecording(r)
            | SyncObjectCreation(r)
            | FenceWait(r)
            | FenceReset(r)
            | Acquire(r)
            | Submit(r)
            | Present(r)
            | WaitIdle(r) => Some(*r),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_and_suboptimal_are_recoverable() {
        for r in [vk::Result::ERROR_OUT_OF_DATE_KHR, vk::Result::SUBOPTIMAL_KHR] {
            assert_eq!(EngineError::Acquire(r).recovery(), Recovery::Recoverable);
            assert_eq!(EngineError::Present(r).recovery(), Recovery::Recoverable);
        }
        assert_eq!(
            EngineError::Submit(vk::Result::ERROR_OUT_OF_DATE_KHR).recovery(),
            Recovery::Fatal
        );
    }

    #[test]
    fn device_lost_is_fatal() {
        let e = EngineError::Acquire(vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(e.recovery(), Recovery::Fatal);
        assert_eq!(e.kind(), ErrorKind::FrameLoop);
        assert_eq!(e.vk_result(), Some(vk::Result::ERROR_DEVICE_LOST));
    }

    #[test]
    fn kinds_follow_the_failure_family() {
        assert_eq!(EngineError::NoAdapter.kind(), ErrorKind::Capability);
        assert_eq!(
            EngineError::NoQueueFamily {
                adapter: "gpu".into()
            }
            .kind(),
            ErrorKind::Capability
        );
        assert_eq!(
            EngineError::SwapchainCreation(vk::Result::ERROR_INITIALIZATION_FAILED).kind(),
            ErrorKind::ResourceCreation
        );
        assert_eq!(
            EngineError::MemoryMapping(vk::Result::ERROR_MEMORY_MAP_FAILED).kind(),
            ErrorKind::Transfer
        );
        assert_eq!(EngineError::NoAdapter.vk_result(), None);
    }

    #[test]
    fn fence_reset_is_its_own_frame_loop_failure() {
        let e = EngineError::FenceReset(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert_eq!(e.kind(), ErrorKind::FrameLoop);
        assert_eq!(e.recovery(), Recovery::Fatal);
        assert_eq!(e.vk_result(), Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert!(e.to_string().starts_with("fence reset failed"));
        assert!(!matches!(e, EngineError::FenceWait(_)));
    }
}
