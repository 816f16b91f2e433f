/// 按扩展名划分的文件类别，用于选择图标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FileKind {
    /// 图片
    Image,
    /// 视频
    Video,
    /// 音频
    Audio,
    /// PDF
    Pdf,
    /// 文档、表格、演示文稿
    Document,
    /// 压缩包
    Archive,
    /// 其他
    Generic,
}

static EXTENSION_KINDS: phf::Map<&'static str, FileKind> = phf::phf_map! {
    "png" => FileKind::Image,
    "jpg" => FileKind::Image,
    "jpeg" => FileKind::Image,
    "gif" => FileKind::Image,
    "heic" => FileKind::Image,
    "webp" => FileKind::Image,
    "bmp" => FileKind::Image,
    "tiff" => FileKind::Image,
    "mp4" => FileKind::Video,
    "mov" => FileKind::Video,
    "m4v" => FileKind::Video,
    "avi" => FileKind::Video,
    "mkv" => FileKind::Video,
    "mp3" => FileKind::Audio,
    "m4a" => FileKind::Audio,
    "wav" => FileKind::Audio,
    "aac" => FileKind::Audio,
    "flac" => FileKind::Audio,
    "pdf" => FileKind::Pdf,
    "doc" => FileKind::Document,
    "docx" => FileKind::Document,
    "pages" => FileKind::Document,
    "txt" => FileKind::Document,
    "rtf" => FileKind::Document,
    "xls" => FileKind::Document,
    "xlsx" => FileKind::Document,
    "numbers" => FileKind::Document,
    "ppt" => FileKind::Document,
    "pptx" => FileKind::Document,
    "key" => FileKind::Document,
    "zip" => FileKind::Archive,
    "gz" => FileKind::Archive,
    "tar" => FileKind::Archive,
    "7z" => FileKind::Archive,
    "rar" => FileKind::Archive,
};

impl FileKind {
    /// 根据文件名的扩展名判断类别（不区分大小写）
    pub fn from_file_name(name: &str) -> Self {
        let Some((_, ext)) = name.rsplit_once('.') else {
            return FileKind::Generic;
        };
        EXTENSION_KINDS
            .get(ext.to_ascii_lowercase().as_str())
            .copied()
            .unwrap_or(FileKind::Generic)
    }

    pub fn name(self) -> &'static str {
        match self {
            FileKind::Image => "图片",
            FileKind::Video => "视频",
            FileKind::Audio => "音频",
            FileKind::Pdf => "PDF",
            FileKind::Document => "文档",
            FileKind::Archive => "压缩包",
            FileKind::Generic => "文件",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
