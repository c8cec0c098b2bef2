use crate::html::Html;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    total: usize,
    per_page: usize,
    page: usize,
}

impl Pagination {
    /// `page` is 1-based and clamped into range; `per_page` of 0 is treated as 1.
    pub fn new(total: usize, per_page: usize, page: usize) -> Self {
        let per_page = per_page.max(1);
        let pages = total.div_ceil(per_page).max(1);

        Self {
            total,
            per_page,
            page: page.clamp(1, pages),
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn pages(&self) -> usize {
        self.total.div_ceil(self.per_page).max(1)
    }

    pub fn offset(&self) -> usize {
        (self.page - 1) * self.per_page
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    /// 1-based first and last item shown, `(0, 0)` when there is nothing.
    pub fn range(&self) -> (usize, usize) {
        if self.total == 0 {
            return (0, 0);
        }
        let first = self.offset() + 1;
        let last = (self.offset() + self.per_page).min(self.total);
        (first, last)
    }

    pub fn summary(&self) -> String {
        let (first, last) = self.range();
        format!("{first} to {last} of {}", self.total)
    }

    /// Slice of `items` for the current page.
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let start = self.offset().min(items.len());
        let end = (start + self.per_page).min(items.len());
        &items[start..end]
    }

    /// Page links, `base` gets `?page=N` (or `&page=N`) appended.
    pub fn links(&self, base: &str) -> Html {
        let mut out = Html::new();
        if self.pages() <= 1 {
            return out;
        }

        let sep = if base.contains('?') { '&' } else { '?' };
        let link = |out: &mut Html, page: usize, text: &str, class: &str| {
            out.push_trusted("<a class=\"");
            out.push_trusted(class);
            out.push_trusted("\" href=\"");
            out.push_text(&format!("{base}{sep}page={page}"));
            out.push_trusted("\">");
            out.push_text(text);
            out.push_trusted("</a>");
        };

        out.push_trusted("<nav class=\"pagination\" aria-label=\"Pagination\">");
        if self.page > 1 {
            link(&mut out, self.page - 1, "Previous", "page-link prev");
        }
        for page in 1..=self.pages() {
            if page == self.page {
                out.push_trusted(&format!(
                    "<span class=\"page-link current\" aria-current=\"page\">{page}</span>"
                ));
            } else {
                link(&mut out, page, &page.to_string(), "page-link");
            }
        }
        if self.page < self.pages() {
            link(&mut out, self.page + 1, "Next", "page-link next");
        }
        out.push_trusted("</nav>");

        out
    }
}
